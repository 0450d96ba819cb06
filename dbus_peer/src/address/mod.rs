//! D-Bus address strings: `transport:key=value,key=value;transport:…`.
//!
//! Parsing only builds the typed [`Entry`] list; actually dialing one is [`crate::address::connect`].

#[cfg(feature = "async-io")]
pub mod connect;

use crate::{Error, Result};

/// One `transport:k=v,…` entry of an address string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Entry {
    Unix(UnixPath),
    Tcp(TcpParams),
    NonceTcp(TcpParams, String),
    Autolaunch,
}

/// The one key set to a Unix transport: exactly one of path/dir/tmpdir/abstract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnixPath {
    Path(String),
    Dir(String),
    TmpDir(String),
    Abstract(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct TcpParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub family: Option<Family>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Family {
    Ipv4,
    Ipv6,
}

/// A full address string: an ordered list of entries, tried in order by [`connect`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Address {
    entries: Vec<Entry>,
    /// The raw `guid=…` key, if present on any entry — an address-provided hint, not validated
    /// against what the transport actually hands back.
    guids: Vec<Option<String>>,
}

impl Address {
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidArgument("address string is empty".into()));
        }
        let mut entries = Vec::new();
        let mut guids = Vec::new();
        for raw_entry in s.split(';').filter(|e| !e.is_empty()) {
            let (transport, params) = raw_entry
                .split_once(':')
                .ok_or_else(|| Error::InvalidArgument(format!("`{raw_entry}` has no transport")))?;
            let mut kv: Vec<(String, String)> = Vec::new();
            if !params.is_empty() {
                for pair in params.split(',') {
                    let (k, v) = pair.split_once('=').ok_or_else(|| {
                        Error::InvalidArgument(format!("`{pair}` is not a key=value pair"))
                    })?;
                    kv.push((decode(k)?, decode(v)?));
                }
            }
            let guid = kv
                .iter()
                .find(|(k, _)| k == "guid")
                .map(|(_, v)| v.clone());
            let entry = match transport {
                "unix" => Entry::Unix(parse_unix(&kv)?),
                "tcp" => Entry::Tcp(parse_tcp(&kv)?),
                "nonce-tcp" => {
                    let tcp = parse_tcp(&kv)?;
                    let noncefile = kv
                        .iter()
                        .find(|(k, _)| k == "noncefile")
                        .map(|(_, v)| v.clone())
                        .filter(|v| !v.is_empty())
                        .ok_or_else(|| {
                            Error::InvalidArgument("nonce-tcp: requires a non-empty noncefile".into())
                        })?;
                    Entry::NonceTcp(tcp, noncefile)
                }
                "autolaunch" => {
                    if !kv.is_empty() {
                        return Err(Error::InvalidArgument(
                            "autolaunch: takes no parameters".into(),
                        ));
                    }
                    Entry::Autolaunch
                }
                other => {
                    return Err(Error::InvalidArgument(format!(
                        "unsupported transport `{other}`"
                    )))
                }
            };
            entries.push(entry);
            guids.push(guid);
        }
        if entries.is_empty() {
            return Err(Error::InvalidArgument("address string is empty".into()));
        }
        Ok(Self { entries, guids })
    }

    /// `true` iff every entry parses and belongs to a supported transport.
    pub fn is_valid(s: &str) -> bool {
        Self::parse(s).is_ok()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn guid_for(&self, index: usize) -> Option<&str> {
        self.guids.get(index).and_then(|g| g.as_deref())
    }
}

fn parse_unix(kv: &[(String, String)]) -> Result<UnixPath> {
    let (mut path, mut dir, mut tmpdir, mut abs) = (None, None, None, None);
    for (k, v) in kv {
        match k.as_str() {
            "path" => path = Some(v.clone()),
            "dir" => dir = Some(v.clone()),
            "tmpdir" => tmpdir = Some(v.clone()),
            "abstract" => abs = Some(v.clone()),
            "guid" => {}
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unknown unix address key `{other}`"
                )))
            }
        }
    }
    match (path, dir, tmpdir, abs) {
        (Some(p), None, None, None) => Ok(UnixPath::Path(p)),
        (None, Some(d), None, None) => Ok(UnixPath::Dir(d)),
        (None, None, Some(t), None) => Ok(UnixPath::TmpDir(t)),
        (None, None, None, Some(a)) => Ok(UnixPath::Abstract(a)),
        _ => Err(Error::InvalidArgument(
            "unix: requires exactly one of path, dir, tmpdir, abstract".into(),
        )),
    }
}

fn parse_tcp(kv: &[(String, String)]) -> Result<TcpParams> {
    let mut params = TcpParams::default();
    for (k, v) in kv {
        match k.as_str() {
            "host" => params.host = Some(v.clone()),
            "port" => {
                params.port = Some(v.parse().map_err(|_| {
                    Error::InvalidArgument(format!("`{v}` is not a valid port"))
                })?)
            }
            "family" => {
                params.family = Some(match v.as_str() {
                    "ipv4" => Family::Ipv4,
                    "ipv6" => Family::Ipv6,
                    other => {
                        return Err(Error::InvalidArgument(format!(
                            "unknown tcp family `{other}`"
                        )))
                    }
                })
            }
            "guid" | "noncefile" => {}
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unknown tcp address key `{other}`"
                )))
            }
        }
    }
    Ok(params)
}

/// URI-escape decode: `%XX` sequences become the raw byte.
fn decode(s: &str) -> Result<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .ok_or_else(|| Error::InvalidArgument(format!("`{s}` has a truncated escape")))?;
            let hex = std::str::from_utf8(hex)
                .map_err(|_| Error::InvalidArgument(format!("`{s}` has an invalid escape")))?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|_| Error::InvalidArgument(format!("`{s}` has an invalid escape")))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| Error::InvalidArgument(format!("`{s}` is not valid UTF-8")))
}

/// URI-escape encode with D-Bus's refinements: `\`, `/` and `~` are always escaped, unlike
/// plain URI escaping which leaves them alone.
pub fn encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        let c = b as char;
        let unreserved = c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.');
        if unreserved && !matches!(c, '\\' | '/' | '~') {
            out.push(c);
        } else {
            out.push_str(&format!("%{b:02x}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unix_path() {
        let addr = Address::parse("unix:path=/tmp/bus").unwrap();
        assert_eq!(
            addr.entries(),
            &[Entry::Unix(UnixPath::Path("/tmp/bus".into()))]
        );
    }

    #[test]
    fn parses_multi_entry_in_order() {
        let addr =
            Address::parse("unix:path=/nonexistent;tcp:host=127.0.0.1,port=0").unwrap();
        assert_eq!(addr.entries().len(), 2);
        assert!(matches!(addr.entries()[1], Entry::Tcp(_)));
    }

    #[test]
    fn nonce_tcp_requires_noncefile() {
        assert!(Address::parse("nonce-tcp:host=127.0.0.1,port=1234").is_err());
        assert!(Address::parse("nonce-tcp:host=127.0.0.1,port=1234,noncefile=/tmp/n").is_ok());
    }

    #[test]
    fn unix_rejects_conflicting_keys() {
        assert!(Address::parse("unix:path=/a,dir=/b").is_err());
    }

    #[test]
    fn unix_rejects_unknown_keys() {
        assert!(Address::parse("unix:path=/tmp/bus,foo=bar").is_err());
    }

    #[test]
    fn autolaunch_takes_no_params() {
        assert!(Address::parse("autolaunch:").is_ok());
        assert!(Address::parse("autolaunch:scope=foo").is_err());
    }

    #[test]
    fn escape_round_trips_through_decode() {
        let value = "a/weird\\name~here";
        let escaped = encode(value);
        let addr = Address::parse(&format!("unix:abstract={escaped}")).unwrap();
        assert_eq!(addr.entries(), &[Entry::Unix(UnixPath::Abstract(value.into()))]);
    }

    #[test]
    fn whole_string_validator() {
        assert!(Address::is_valid("unix:path=/tmp/bus"));
        assert!(!Address::is_valid("carrier-pigeon:"));
    }
}
