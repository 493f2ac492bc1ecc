//! Kernel definitions.
//!
//! A kernel is a named body run once per invocation of a launch, plus an
//! optional adjoint body run by the reverse pass. Parameter marshaling is
//! resolved when the kernel is built: a kernel whose single parameter is a
//! struct takes the packed-struct path, every other kernel validates its
//! arguments one by one.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tessel_core::{Device, Result, TesselError};

use crate::invocation::Invocation;
use crate::params::{Arg, Args, ParamType, StructDef};

/// Body of a kernel: invoked once per launch index.
pub type KernelFn = dyn Fn(&Invocation<'_>, &Args) -> Result<()> + Send + Sync;

static NEXT_KERNEL_ID: AtomicU64 = AtomicU64::new(0);

/// A declared kernel parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
}

/// How launch arguments are validated and bound.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamConvention {
    /// Each argument is checked against its parameter on every launch.
    Flat,
    /// A single pre-packed struct is bound by handle.
    Struct(Arc<StructDef>),
}

struct KernelInner {
    id: u64,
    name: String,
    params: Vec<ParamSpec>,
    convention: ParamConvention,
    forward: Box<KernelFn>,
    adjoint: Option<Box<KernelFn>>,
}

/// A compiled kernel handle. Cloning is cheap.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

impl Kernel {
    pub fn builder(name: &str) -> KernelBuilder {
        KernelBuilder {
            name: name.to_string(),
            params: Vec::new(),
            forward: None,
            adjoint: None,
            enable_backward: true,
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.inner.params
    }

    pub fn convention(&self) -> &ParamConvention {
        &self.inner.convention
    }

    /// Whether the kernel can take part in a reverse pass.
    pub fn has_adjoint(&self) -> bool {
        self.inner.adjoint.is_some()
    }

    pub(crate) fn forward_fn(&self) -> &KernelFn {
        &*self.inner.forward
    }

    pub(crate) fn adjoint_fn(&self) -> Result<&KernelFn> {
        self.inner
            .adjoint
            .as_deref()
            .ok_or_else(|| TesselError::NoAdjoint(self.inner.name.clone()))
    }

    pub fn ptr_eq(&self, other: &Kernel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Check one argument against parameter `idx` for a launch on `device`.
    pub fn check_arg(&self, idx: usize, arg: &Arg, device: Device) -> Result<()> {
        let spec = self.inner.params.get(idx).ok_or_else(|| {
            TesselError::InvalidArgument(format!(
                "kernel '{}' has no parameter #{idx}",
                self.inner.name
            ))
        })?;
        spec.ty.check(&spec.name, arg)?;
        check_devices(arg, device)
    }

    /// Validate and bind launch arguments for `device`.
    pub fn marshal(&self, args: Vec<Arg>, device: Device) -> Result<Args> {
        let expected = self.inner.params.len();
        if args.len() != expected {
            return Err(TesselError::ArgumentCount {
                kernel: self.inner.name.clone(),
                expected,
                got: args.len(),
            });
        }
        match &self.inner.convention {
            ParamConvention::Flat => {
                for (spec, arg) in self.inner.params.iter().zip(&args) {
                    spec.ty.check(&spec.name, arg)?;
                    check_devices(arg, device)?;
                }
            }
            ParamConvention::Struct(def) => {
                let arg = &args[0];
                match arg {
                    Arg::Struct(value) if Arc::ptr_eq(value.def(), def) => {}
                    _ => self.inner.params[0].ty.check(&self.inner.params[0].name, arg)?,
                }
                check_devices(arg, device)?;
            }
        }
        Ok(Args::new(args))
    }
}

fn check_devices(arg: &Arg, device: Device) -> Result<()> {
    for got in arg.devices() {
        if got != device {
            return Err(TesselError::DeviceMismatch {
                expected: device,
                got,
            });
        }
    }
    Ok(())
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.inner.name)
            .field("params", &self.inner.params)
            .field("convention", &self.inner.convention)
            .field("adjoint", &self.has_adjoint())
            .finish()
    }
}

/// Builder for [`Kernel`].
pub struct KernelBuilder {
    name: String,
    params: Vec<ParamSpec>,
    forward: Option<Box<KernelFn>>,
    adjoint: Option<Box<KernelFn>>,
    enable_backward: bool,
}

impl KernelBuilder {
    pub fn param(mut self, name: &str, ty: ParamType) -> Self {
        self.params.push(ParamSpec {
            name: name.to_string(),
            ty,
        });
        self
    }

    pub fn forward<F>(mut self, f: F) -> Self
    where
        F: Fn(&Invocation<'_>, &Args) -> Result<()> + Send + Sync + 'static,
    {
        self.forward = Some(Box::new(f));
        self
    }

    pub fn adjoint<F>(mut self, f: F) -> Self
    where
        F: Fn(&Invocation<'_>, &Args) -> Result<()> + Send + Sync + 'static,
    {
        self.adjoint = Some(Box::new(f));
        self
    }

    /// Drop the adjoint body when `false`. Kernels built without one reject
    /// recording on a tape.
    pub fn enable_backward(mut self, enable: bool) -> Self {
        self.enable_backward = enable;
        self
    }

    pub fn build(self) -> Result<Kernel> {
        let forward = self.forward.ok_or_else(|| {
            TesselError::InvalidArgument(format!("kernel '{}' has no forward body", self.name))
        })?;
        for (i, p) in self.params.iter().enumerate() {
            if self.params[..i].iter().any(|q| q.name == p.name) {
                return Err(TesselError::InvalidArgument(format!(
                    "kernel '{}' declares parameter '{}' twice",
                    self.name, p.name
                )));
            }
        }
        let convention = match self.params.as_slice() {
            [ParamSpec {
                ty: ParamType::Struct(def),
                ..
            }] => ParamConvention::Struct(Arc::clone(def)),
            _ => ParamConvention::Flat,
        };
        let adjoint = if self.enable_backward { self.adjoint } else { None };
        let id = NEXT_KERNEL_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            kernel = %self.name,
            id,
            params = self.params.len(),
            ?convention,
            adjoint = adjoint.is_some(),
            "kernel built"
        );
        Ok(Kernel {
            inner: Arc::new(KernelInner {
                id,
                name: self.name,
                params: self.params,
                convention,
                forward,
                adjoint,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{StructValue, Vec3};
    use tessel_core::{Array, DType};

    fn noop() -> impl Fn(&Invocation<'_>, &Args) -> Result<()> + Send + Sync + 'static {
        |_: &Invocation<'_>, _: &Args| Ok(())
    }

    #[test]
    fn test_convention_resolved_at_build() {
        let def = StructDef::new("S")
            .field("v", ParamType::Vec3)
            .build()
            .unwrap();
        let k = Kernel::builder("ks")
            .param("s", ParamType::Struct(Arc::clone(&def)))
            .forward(noop())
            .build()
            .unwrap();
        assert_eq!(k.convention(), &ParamConvention::Struct(def));

        let k = Kernel::builder("kf")
            .param("a", ParamType::F32)
            .param("b", ParamType::F32)
            .forward(noop())
            .build()
            .unwrap();
        assert_eq!(k.convention(), &ParamConvention::Flat);
    }

    #[test]
    fn test_missing_forward() {
        assert!(Kernel::builder("empty").build().is_err());
    }

    #[test]
    fn test_enable_backward_false_drops_adjoint() {
        let k = Kernel::builder("k")
            .forward(noop())
            .adjoint(noop())
            .enable_backward(false)
            .build()
            .unwrap();
        assert!(!k.has_adjoint());
        assert!(matches!(k.adjoint_fn(), Err(TesselError::NoAdjoint(_))));
    }

    #[test]
    fn test_marshal_flat() {
        let k = Kernel::builder("k")
            .param("a", ParamType::array1d(DType::F32))
            .param("v", ParamType::Vec3)
            .forward(noop())
            .build()
            .unwrap();
        let a = Array::zeros(&[4], DType::F32, Device::Cpu).unwrap();
        let args = k
            .marshal(vec![a.clone().into(), Vec3::new(1.0, 2.0, 3.0).into()], Device::Cpu)
            .unwrap();
        assert_eq!(args.len(), 2);

        let err = k.marshal(vec![a.clone().into()], Device::Cpu).unwrap_err();
        assert!(matches!(err, TesselError::ArgumentCount { expected: 2, got: 1, .. }));

        let err = k
            .marshal(vec![a.into(), Vec3::default().into()], Device::Accel(0))
            .unwrap_err();
        assert!(matches!(err, TesselError::DeviceMismatch { .. }));
    }

    #[test]
    fn test_marshal_struct() {
        let def = StructDef::new("S")
            .field("a", ParamType::array1d(DType::F32))
            .build()
            .unwrap();
        let k = Kernel::builder("k")
            .param("s", ParamType::Struct(Arc::clone(&def)))
            .forward(noop())
            .build()
            .unwrap();
        let a = Array::zeros(&[4], DType::F32, Device::Cpu).unwrap();
        let value = StructValue::builder(&def).set("a", &a).unwrap().build().unwrap();
        k.marshal(vec![value.clone().into()], Device::Cpu).unwrap();
        assert!(k.marshal(vec![value.into()], Device::Accel(0)).is_err());
        assert!(k.marshal(vec![Arg::F32(0.0)], Device::Cpu).is_err());
    }
}
