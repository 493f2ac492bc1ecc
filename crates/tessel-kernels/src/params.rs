//! Kernel parameters and launch arguments.
//!
//! A kernel declares typed parameters; a launch supplies [`Arg`]s. Related
//! parameters can be grouped into a user-defined struct ([`StructDef`]),
//! whose values are validated and packed once when built.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use tessel_core::{Array, DType, Device, Result, TesselError};

/// Three-component float vector passed by value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3(pub [f32; 3]);

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self([x, y, z])
    }

    pub fn x(&self) -> f32 {
        self.0[0]
    }

    pub fn y(&self) -> f32 {
        self.0[1]
    }

    pub fn z(&self) -> f32 {
        self.0[2]
    }
}

/// Declared type of a kernel parameter or struct field.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamType {
    Array { dtype: DType, ndim: usize },
    F32,
    F64,
    Vec3,
    Struct(Arc<StructDef>),
}

impl ParamType {
    pub fn array1d(dtype: DType) -> Self {
        ParamType::Array { dtype, ndim: 1 }
    }

    pub fn array2d(dtype: DType) -> Self {
        ParamType::Array { dtype, ndim: 2 }
    }

    /// Check that `arg` can bind to a parameter of this type.
    pub fn check(&self, name: &str, arg: &Arg) -> Result<()> {
        let ok = match (self, arg) {
            (ParamType::Array { dtype, ndim }, Arg::Array(a)) => {
                if a.dtype() != *dtype {
                    return Err(TesselError::DTypeMismatch {
                        expected: *dtype,
                        got: a.dtype(),
                    });
                }
                if a.ndim() != *ndim {
                    return Err(TesselError::InvalidArgument(format!(
                        "parameter '{name}' expects a {ndim}-d array, got shape {}",
                        a.shape()
                    )));
                }
                true
            }
            (ParamType::F32, Arg::F32(_)) => true,
            (ParamType::F64, Arg::F64(_)) => true,
            (ParamType::Vec3, Arg::Vec3(_)) => true,
            (ParamType::Struct(def), Arg::Struct(v)) => Arc::ptr_eq(def, &v.def) || **def == *v.def,
            _ => false,
        };
        if !ok {
            return Err(TesselError::InvalidArgument(format!(
                "parameter '{name}' expects {self}, got {}",
                arg.kind()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Array { dtype, ndim } => write!(f, "array{ndim}d<{dtype}>"),
            ParamType::F32 => f.write_str("f32"),
            ParamType::F64 => f.write_str("f64"),
            ParamType::Vec3 => f.write_str("vec3"),
            ParamType::Struct(def) => write!(f, "struct {}", def.name),
        }
    }
}

/// A named, typed struct field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub ty: ParamType,
}

/// A user-defined parameter struct.
#[derive(Debug, Clone, PartialEq)]
pub struct StructDef {
    name: String,
    fields: Vec<FieldDef>,
}

impl StructDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: &str, ty: ParamType) -> Self {
        self.fields.push(FieldDef {
            name: name.to_string(),
            ty,
        });
        self
    }

    /// Finish the definition. Field names must be unique.
    pub fn build(self) -> Result<Arc<StructDef>> {
        for (i, f) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|g| g.name == f.name) {
                return Err(TesselError::InvalidArgument(format!(
                    "struct {} declares field '{}' twice",
                    self.name, f.name
                )));
            }
        }
        Ok(Arc::new(self))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// A validated struct value.
///
/// Fields are checked and packed when the value is built, so launches pass
/// it by handle without revisiting each field.
#[derive(Clone)]
pub struct StructValue {
    def: Arc<StructDef>,
    fields: Arc<[Arg]>,
    devices: SmallVec<[Device; 4]>,
}

impl StructValue {
    pub fn builder(def: &Arc<StructDef>) -> StructBuilder {
        StructBuilder {
            def: Arc::clone(def),
            slots: vec![None; def.fields.len()],
        }
    }

    pub fn def(&self) -> &Arc<StructDef> {
        &self.def
    }

    pub fn field(&self, name: &str) -> Result<&Arg> {
        let idx = self.def.field_index(name).ok_or_else(|| {
            TesselError::InvalidArgument(format!("struct {} has no field '{name}'", self.def.name))
        })?;
        Ok(&self.fields[idx])
    }

    pub fn array(&self, name: &str) -> Result<&Array> {
        self.field(name)?.as_array()
    }

    pub fn f32(&self, name: &str) -> Result<f32> {
        self.field(name)?.as_f32()
    }

    pub fn vec3(&self, name: &str) -> Result<Vec3> {
        self.field(name)?.as_vec3()
    }

    /// Distinct devices of the arrays this value holds.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }
}

impl fmt::Debug for StructValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(&self.def.name);
        for (def, arg) in self.def.fields.iter().zip(self.fields.iter()) {
            s.field(&def.name, arg);
        }
        s.finish()
    }
}

/// Incrementally assigns the fields of a [`StructValue`].
pub struct StructBuilder {
    def: Arc<StructDef>,
    slots: Vec<Option<Arg>>,
}

impl StructBuilder {
    pub fn set(mut self, name: &str, value: impl Into<Arg>) -> Result<Self> {
        let idx = self.def.field_index(name).ok_or_else(|| {
            TesselError::InvalidArgument(format!("struct {} has no field '{name}'", self.def.name))
        })?;
        let value = value.into();
        self.def.fields[idx].ty.check(name, &value)?;
        self.slots[idx] = Some(value);
        Ok(self)
    }

    /// Validate that every field is assigned and pack the value.
    pub fn build(self) -> Result<StructValue> {
        let mut fields = Vec::with_capacity(self.slots.len());
        let mut devices: SmallVec<[Device; 4]> = SmallVec::new();
        for (def, slot) in self.def.fields.iter().zip(self.slots) {
            let arg = slot.ok_or_else(|| {
                TesselError::InvalidArgument(format!(
                    "struct {} field '{}' is unset",
                    self.def.name, def.name
                ))
            })?;
            for device in arg.devices() {
                if !devices.contains(&device) {
                    devices.push(device);
                }
            }
            fields.push(arg);
        }
        Ok(StructValue {
            def: self.def,
            fields: fields.into(),
            devices,
        })
    }
}

/// A launch argument.
#[derive(Clone)]
pub enum Arg {
    Array(Array),
    F32(f32),
    F64(f64),
    Vec3(Vec3),
    Struct(StructValue),
}

impl Arg {
    pub fn kind(&self) -> &'static str {
        match self {
            Arg::Array(_) => "array",
            Arg::F32(_) => "f32",
            Arg::F64(_) => "f64",
            Arg::Vec3(_) => "vec3",
            Arg::Struct(_) => "struct",
        }
    }

    fn mismatch(&self, expected: &str) -> TesselError {
        TesselError::InvalidArgument(format!("expected {expected} argument, got {}", self.kind()))
    }

    pub fn as_array(&self) -> Result<&Array> {
        match self {
            Arg::Array(a) => Ok(a),
            _ => Err(self.mismatch("array")),
        }
    }

    pub fn as_f32(&self) -> Result<f32> {
        match self {
            Arg::F32(v) => Ok(*v),
            _ => Err(self.mismatch("f32")),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Arg::F64(v) => Ok(*v),
            Arg::F32(v) => Ok(*v as f64),
            _ => Err(self.mismatch("f64")),
        }
    }

    pub fn as_vec3(&self) -> Result<Vec3> {
        match self {
            Arg::Vec3(v) => Ok(*v),
            _ => Err(self.mismatch("vec3")),
        }
    }

    pub fn as_struct(&self) -> Result<&StructValue> {
        match self {
            Arg::Struct(s) => Ok(s),
            _ => Err(self.mismatch("struct")),
        }
    }

    /// Devices of the arrays reachable from this argument.
    pub fn devices(&self) -> SmallVec<[Device; 4]> {
        match self {
            Arg::Array(a) => smallvec::smallvec![a.device()],
            Arg::Struct(s) => s.devices.clone(),
            _ => SmallVec::new(),
        }
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Array(a) => write!(f, "Array({} {} {})", a.dtype(), a.shape(), a.device()),
            Arg::F32(v) => write!(f, "{v}f32"),
            Arg::F64(v) => write!(f, "{v}f64"),
            Arg::Vec3(v) => write!(f, "{:?}", v.0),
            Arg::Struct(s) => fmt::Debug::fmt(s, f),
        }
    }
}

impl From<Array> for Arg {
    fn from(a: Array) -> Self {
        Arg::Array(a)
    }
}

impl From<&Array> for Arg {
    fn from(a: &Array) -> Self {
        Arg::Array(a.clone())
    }
}

impl From<f32> for Arg {
    fn from(v: f32) -> Self {
        Arg::F32(v)
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Self {
        Arg::F64(v)
    }
}

impl From<Vec3> for Arg {
    fn from(v: Vec3) -> Self {
        Arg::Vec3(v)
    }
}

impl From<StructValue> for Arg {
    fn from(v: StructValue) -> Self {
        Arg::Struct(v)
    }
}

impl From<&StructValue> for Arg {
    fn from(v: &StructValue) -> Self {
        Arg::Struct(v.clone())
    }
}

/// Marshaled arguments of one launch, shared by handle.
#[derive(Clone)]
pub struct Args {
    values: Arc<Vec<Arg>>,
}

impl Args {
    pub(crate) fn new(values: Vec<Arg>) -> Self {
        Self {
            values: Arc::new(values),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Result<&Arg> {
        self.values.get(idx).ok_or_else(|| {
            TesselError::InvalidArgument(format!("argument #{idx} out of range ({} bound)", self.values.len()))
        })
    }

    pub fn array(&self, idx: usize) -> Result<&Array> {
        self.get(idx)?.as_array()
    }

    pub fn f32(&self, idx: usize) -> Result<f32> {
        self.get(idx)?.as_f32()
    }

    pub fn f64(&self, idx: usize) -> Result<f64> {
        self.get(idx)?.as_f64()
    }

    pub fn vec3(&self, idx: usize) -> Result<Vec3> {
        self.get(idx)?.as_vec3()
    }

    pub fn structure(&self, idx: usize) -> Result<&StructValue> {
        self.get(idx)?.as_struct()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arg> {
        self.values.iter()
    }

    /// Replace one argument; copies the list if other launches share it.
    pub(crate) fn set(&mut self, idx: usize, arg: Arg) -> Result<()> {
        let len = self.values.len();
        let slot = Arc::make_mut(&mut self.values).get_mut(idx).ok_or_else(|| {
            TesselError::InvalidArgument(format!("argument #{idx} out of range ({len} bound)"))
        })?;
        *slot = arg;
        Ok(())
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.values.iter()).finish()
    }
}
