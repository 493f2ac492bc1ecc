//! Scalar functions applied elementwise by tile maps.
//!
//! A function is written once, generic over [`Real`]. Evaluating it on f64
//! gives the forward value; evaluating it on [`Dual`] gives the derivative
//! the adjoint kernels need.

use std::ops::{Add, Div, Mul, Neg, Sub};

/// Number types a scalar function can be evaluated on.
pub trait Real:
    Copy
    + Send
    + Sync
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
{
    fn constant(v: f64) -> Self;
    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn exp(self) -> Self;
    fn ln(self) -> Self;
    fn sqrt(self) -> Self;
    fn tanh(self) -> Self;
}

impl Real for f64 {
    #[inline]
    fn constant(v: f64) -> Self {
        v
    }
    #[inline]
    fn sin(self) -> Self {
        f64::sin(self)
    }
    #[inline]
    fn cos(self) -> Self {
        f64::cos(self)
    }
    #[inline]
    fn exp(self) -> Self {
        f64::exp(self)
    }
    #[inline]
    fn ln(self) -> Self {
        f64::ln(self)
    }
    #[inline]
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }
    #[inline]
    fn tanh(self) -> Self {
        f64::tanh(self)
    }
}

/// Forward-mode dual number `value + deriv·ε`, `ε² = 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dual {
    pub value: f64,
    pub deriv: f64,
}

impl Dual {
    /// The variable being differentiated against.
    pub fn variable(value: f64) -> Self {
        Self { value, deriv: 1.0 }
    }

    pub fn constant(value: f64) -> Self {
        Self { value, deriv: 0.0 }
    }
}

impl Add for Dual {
    type Output = Dual;
    fn add(self, rhs: Dual) -> Dual {
        Dual {
            value: self.value + rhs.value,
            deriv: self.deriv + rhs.deriv,
        }
    }
}

impl Sub for Dual {
    type Output = Dual;
    fn sub(self, rhs: Dual) -> Dual {
        Dual {
            value: self.value - rhs.value,
            deriv: self.deriv - rhs.deriv,
        }
    }
}

impl Mul for Dual {
    type Output = Dual;
    fn mul(self, rhs: Dual) -> Dual {
        Dual {
            value: self.value * rhs.value,
            deriv: self.deriv * rhs.value + self.value * rhs.deriv,
        }
    }
}

impl Div for Dual {
    type Output = Dual;
    fn div(self, rhs: Dual) -> Dual {
        Dual {
            value: self.value / rhs.value,
            deriv: (self.deriv * rhs.value - self.value * rhs.deriv) / (rhs.value * rhs.value),
        }
    }
}

impl Neg for Dual {
    type Output = Dual;
    fn neg(self) -> Dual {
        Dual {
            value: -self.value,
            deriv: -self.deriv,
        }
    }
}

impl Real for Dual {
    fn constant(v: f64) -> Self {
        Dual::constant(v)
    }

    fn sin(self) -> Self {
        Dual {
            value: self.value.sin(),
            deriv: self.value.cos() * self.deriv,
        }
    }

    fn cos(self) -> Self {
        Dual {
            value: self.value.cos(),
            deriv: -self.value.sin() * self.deriv,
        }
    }

    fn exp(self) -> Self {
        let e = self.value.exp();
        Dual {
            value: e,
            deriv: e * self.deriv,
        }
    }

    fn ln(self) -> Self {
        Dual {
            value: self.value.ln(),
            deriv: self.deriv / self.value,
        }
    }

    fn sqrt(self) -> Self {
        let s = self.value.sqrt();
        Dual {
            value: s,
            deriv: self.deriv / (2.0 * s),
        }
    }

    fn tanh(self) -> Self {
        let t = self.value.tanh();
        Dual {
            value: t,
            deriv: (1.0 - t * t) * self.deriv,
        }
    }
}

/// A scalar function of one argument.
pub trait UnaryFunc: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn eval<T: Real>(&self, x: T) -> T;

    fn value(&self, x: f64) -> f64 {
        self.eval(x)
    }

    /// `f'(x)`.
    fn derivative(&self, x: f64) -> f64 {
        self.eval(Dual::variable(x)).deriv
    }
}

/// A scalar function of two arguments.
pub trait BinaryFunc: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn eval<T: Real>(&self, x: T, y: T) -> T;

    fn value(&self, x: f64, y: f64) -> f64 {
        self.eval(x, y)
    }

    /// `(∂f/∂x, ∂f/∂y)` at `(x, y)`.
    fn partials(&self, x: f64, y: f64) -> (f64, f64) {
        let dx = self.eval(Dual::variable(x), Dual::constant(y)).deriv;
        let dy = self.eval(Dual::constant(x), Dual::variable(y)).deriv;
        (dx, dy)
    }
}

/// `sin(x)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sin;

impl UnaryFunc for Sin {
    fn name(&self) -> &str {
        "sin"
    }
    fn eval<T: Real>(&self, x: T) -> T {
        x.sin()
    }
}

/// `x`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl UnaryFunc for Identity {
    fn name(&self) -> &str {
        "identity"
    }
    fn eval<T: Real>(&self, x: T) -> T {
        x
    }
}

/// `sin(x) + y`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SinPlus;

impl BinaryFunc for SinPlus {
    fn name(&self) -> &str {
        "sin_plus"
    }
    fn eval<T: Real>(&self, x: T, y: T) -> T {
        x.sin() + y
    }
}

/// `x · y`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Product;

impl BinaryFunc for Product {
    fn name(&self) -> &str {
        "product"
    }
    fn eval<T: Real>(&self, x: T, y: T) -> T {
        x * y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Poly;

    impl UnaryFunc for Poly {
        fn name(&self) -> &str {
            "poly"
        }
        // x³ / 3 - 2x
        fn eval<T: Real>(&self, x: T) -> T {
            x * x * x / T::constant(3.0) - T::constant(2.0) * x
        }
    }

    #[test]
    fn test_sin_derivative() {
        for &x in &[0.0, 0.5, 1.0, -2.0] {
            assert!((Sin.value(x) - x.sin()).abs() < 1e-15);
            assert!((Sin.derivative(x) - x.cos()).abs() < 1e-15);
        }
        assert_eq!(Identity.derivative(7.0), 1.0);
    }

    #[test]
    fn test_polynomial_derivative() {
        // d/dx = x² - 2
        assert!((Poly.derivative(3.0) - 7.0).abs() < 1e-12);
        assert!((Poly.value(3.0) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_binary_partials() {
        let (dx, dy) = SinPlus.partials(0.3, 5.0);
        assert!((dx - 0.3f64.cos()).abs() < 1e-15);
        assert_eq!(dy, 1.0);

        let (dx, dy) = Product.partials(2.0, 3.0);
        assert_eq!((dx, dy), (3.0, 2.0));
    }

    #[test]
    fn test_dual_rules() {
        let x = Dual::variable(0.5);
        let q = x.exp() / x;
        // (eˣ/x)' = eˣ(x-1)/x²
        let expected = 0.5f64.exp() * (0.5 - 1.0) / 0.25;
        assert!((q.deriv - expected).abs() < 1e-12);
        assert!(((-x).tanh().deriv + (1.0 - 0.5f64.tanh().powi(2))).abs() < 1e-12);
        assert!((x.sqrt().deriv - 0.5 / 0.5f64.sqrt()).abs() < 1e-12);
        assert!((x.ln().deriv - 2.0).abs() < 1e-12);
    }
}
