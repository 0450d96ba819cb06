use crate::{Error, Result, Signature, Value};

/// Incrementally builds an `array(T)` value, validating each child against the declared (or
/// inferred) element type as it is added.
#[derive(Debug, Default)]
pub struct ArrayBuilder {
    element_ty: Option<Signature>,
    items: Vec<Value>,
}

impl ArrayBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a builder with a definite element type, so the array can be finished with zero
    /// children.
    pub fn with_type(element_ty: Signature) -> Self {
        Self {
            element_ty: Some(element_ty),
            items: Vec::new(),
        }
    }

    pub fn append(&mut self, value: Value) -> Result<&mut Self> {
        let ty = value.value_signature();
        match &self.element_ty {
            Some(expected) if *expected != ty => return Err(Error::IncorrectType),
            Some(_) => {}
            None => self.element_ty = Some(ty),
        }
        self.items.push(value);
        Ok(self)
    }

    pub fn build(self) -> Result<Value> {
        let ty = self.element_ty.ok_or(Error::CouldNotInferType)?;
        Ok(Value::raw_array(ty, self.items))
    }
}

/// Incrementally builds a `tuple(T1, ..., Tn)` value.
///
/// With a definite type (`with_types`), each added child is checked against the corresponding
/// slot; with an indefinite type, any children are accepted and the tuple's type is computed
/// from what was actually added.
#[derive(Debug, Default)]
pub struct StructBuilder {
    definite_types: Option<Vec<Signature>>,
    fields: Vec<Value>,
}

impl StructBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_types(types: Vec<Signature>) -> Self {
        Self {
            definite_types: Some(types),
            fields: Vec::new(),
        }
    }

    pub fn append(&mut self, value: Value) -> Result<&mut Self> {
        if let Some(types) = &self.definite_types {
            let slot = types
                .get(self.fields.len())
                .ok_or(Error::IncorrectType)?;
            if *slot != value.value_signature() {
                return Err(Error::IncorrectType);
            }
        }
        self.fields.push(value);
        Ok(self)
    }

    pub fn build(self) -> Result<Value> {
        if let Some(types) = &self.definite_types {
            if types.len() != self.fields.len() {
                return Err(Error::IncorrectType);
            }
        }
        Ok(Value::raw_struct(self.fields))
    }
}

/// Incrementally builds an `array({K: V})` dict value. The key type must be a [`crate::Basic`]
/// type; this is enforced by [`Signature::Dict`]'s own parser but re-checked here since the
/// builder can also be driven with programmatically constructed signatures.
#[derive(Debug, Default)]
pub struct DictBuilder {
    key_ty: Option<Signature>,
    value_ty: Option<Signature>,
    entries: Vec<(Value, Value)>,
}

impl DictBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_types(key_ty: Signature, value_ty: Signature) -> Self {
        Self {
            key_ty: Some(key_ty),
            value_ty: Some(value_ty),
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, key: Value, value: Value) -> Result<&mut Self> {
        if !key.value_signature().is_basic() {
            return Err(Error::IncorrectType);
        }
        match (&self.key_ty, &self.value_ty) {
            (Some(k), Some(v)) => {
                if *k != key.value_signature() || *v != value.value_signature() {
                    return Err(Error::IncorrectType);
                }
            }
            _ => {
                self.key_ty = Some(key.value_signature());
                self.value_ty = Some(value.value_signature());
            }
        }
        self.entries.push((key, value));
        Ok(self)
    }

    pub fn build(self) -> Result<Value> {
        let key_ty = self.key_ty.ok_or(Error::CouldNotInferType)?;
        let value_ty = self.value_ty.ok_or(Error::CouldNotInferType)?;
        Ok(Value::raw_dict(key_ty, value_ty, self.entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_requires_matching_types() {
        let mut b = ArrayBuilder::new();
        b.append(Value::int32(1)).unwrap();
        assert!(b.append(Value::string("x")).is_err());
    }

    #[test]
    fn array_with_no_children_and_no_type_fails() {
        assert!(ArrayBuilder::new().build().is_err());
        assert!(ArrayBuilder::with_type(Signature::Int32).build().is_ok());
    }

    #[test]
    fn struct_indefinite_infers_from_children() {
        let mut b = StructBuilder::new();
        b.append(Value::int32(1)).unwrap();
        b.append(Value::string("x")).unwrap();
        let v = b.build().unwrap();
        assert_eq!(v.value_signature().to_string(), "(is)");
    }

    #[test]
    fn dict_rejects_variant_key() {
        let mut b = DictBuilder::new();
        assert!(b
            .insert(Value::variant(Value::int32(1)), Value::int32(2))
            .is_err());
    }
}
