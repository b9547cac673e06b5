//! Integer transport across the host/guest boundary.
//!
//! Arguments arrive as `i128` so every value of all four domains is
//! representable. They are range checked against the requested
//! [`NumericDomain`] and passed as the domain's Wasm type, unsigned values
//! keeping their bit pattern. Results are read back the same way, so an
//! `i32` result of `-2` reads as `4294967294` in the `u32` domain.

use wasmtime::{FuncType, Val, ValType};

use wasm_host_common::{HostError, NumericDomain, WasmIntType};

mod sealed {
    pub trait Sealed {}
    impl Sealed for i32 {}
    impl Sealed for u32 {}
    impl Sealed for i64 {}
    impl Sealed for u64 {}
}

/// A Rust integer type tied to one [`NumericDomain`].
///
/// Implemented for `i32`, `u32`, `i64`, and `u64`. Values of these types
/// are always in range, so typed calls skip the argument range check.
pub trait DomainValue: Copy + sealed::Sealed {
    /// The domain this type transports through.
    const DOMAIN: NumericDomain;

    /// Encode as the domain's Wasm value.
    fn into_val(self) -> Val;

    /// Decode from the domain's Wasm value.
    fn from_val(val: &Val) -> Option<Self>;
}

impl DomainValue for i32 {
    const DOMAIN: NumericDomain = NumericDomain::SignedInt32;

    fn into_val(self) -> Val {
        Val::I32(self)
    }

    fn from_val(val: &Val) -> Option<Self> {
        val.i32()
    }
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
impl DomainValue for u32 {
    const DOMAIN: NumericDomain = NumericDomain::UnsignedInt32;

    fn into_val(self) -> Val {
        Val::I32(self as i32)
    }

    fn from_val(val: &Val) -> Option<Self> {
        val.i32().map(|v| v as u32)
    }
}

impl DomainValue for i64 {
    const DOMAIN: NumericDomain = NumericDomain::SignedInt64;

    fn into_val(self) -> Val {
        Val::I64(self)
    }

    fn from_val(val: &Val) -> Option<Self> {
        val.i64()
    }
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
impl DomainValue for u64 {
    const DOMAIN: NumericDomain = NumericDomain::UnsignedInt64;

    fn into_val(self) -> Val {
        Val::I64(self as i64)
    }

    fn from_val(val: &Val) -> Option<Self> {
        val.i64().map(|v| v as u64)
    }
}

/// Range check `args` against `domain` and encode them as Wasm values.
///
/// # Errors
///
/// Returns [`HostError::ArgumentOutOfRange`] for the first argument outside
/// the domain.
pub fn marshal_args(domain: NumericDomain, args: &[i128]) -> Result<Vec<Val>, HostError> {
    args.iter()
        .enumerate()
        .map(|(index, &value)| {
            if domain.contains(value) {
                Ok(to_val(domain, value))
            } else {
                Err(HostError::ArgumentOutOfRange {
                    index,
                    value,
                    domain,
                })
            }
        })
        .collect()
}

/// Encode an in-range value, keeping its low bits.
#[allow(clippy::cast_possible_truncation)]
fn to_val(domain: NumericDomain, value: i128) -> Val {
    match domain.wasm_type() {
        WasmIntType::I32 => Val::I32(value as i32),
        WasmIntType::I64 => Val::I64(value as i64),
    }
}

/// Decode a Wasm result under `domain`.
///
/// Returns `None` if the value is not of the domain's Wasm type.
#[allow(clippy::cast_sign_loss)]
pub fn unmarshal(domain: NumericDomain, val: &Val) -> Option<i128> {
    match (domain, val) {
        (NumericDomain::SignedInt32, Val::I32(v)) => Some(i128::from(*v)),
        (NumericDomain::UnsignedInt32, Val::I32(v)) => Some(i128::from(*v as u32)),
        (NumericDomain::SignedInt64, Val::I64(v)) => Some(i128::from(*v)),
        (NumericDomain::UnsignedInt64, Val::I64(v)) => Some(i128::from(*v as u64)),
        _ => None,
    }
}

/// Check that export `name` of type `ty` takes `arity` values and returns
/// one value, all of `domain`'s Wasm type.
///
/// # Errors
///
/// Returns [`HostError::TypeMismatch`] describing both signatures.
pub fn check_signature(
    name: &str,
    ty: &FuncType,
    domain: NumericDomain,
    arity: usize,
) -> Result<(), HostError> {
    check_shape(name, ty, domain, arity, 1)
}

/// Check that export `name` of type `ty` takes `arity` values of
/// `domain`'s Wasm type and returns nothing.
///
/// # Errors
///
/// Returns [`HostError::TypeMismatch`] describing both signatures.
pub fn check_procedure_signature(
    name: &str,
    ty: &FuncType,
    domain: NumericDomain,
    arity: usize,
) -> Result<(), HostError> {
    check_shape(name, ty, domain, arity, 0)
}

fn check_shape(
    name: &str,
    ty: &FuncType,
    domain: NumericDomain,
    arity: usize,
    results: usize,
) -> Result<(), HostError> {
    let wanted = domain.wasm_type();
    let params_match = ty.params().len() == arity && ty.params().all(|p| is_int(&p, wanted));
    let results_match = ty.results().len() == results && ty.results().all(|r| is_int(&r, wanted));

    if params_match && results_match {
        return Ok(());
    }

    let wanted = wanted.to_string();
    Err(HostError::TypeMismatch {
        name: name.to_string(),
        expected: describe_signature(
            std::iter::repeat_n(wanted.clone(), arity),
            std::iter::repeat_n(wanted, results),
        ),
        actual: describe_func_type(ty),
    })
}

/// Render a function type as `(i32, i32) -> i32`.
pub(crate) fn describe_func_type(ty: &FuncType) -> String {
    describe_signature(
        ty.params().map(|p| type_name(&p)),
        ty.results().map(|r| type_name(&r)),
    )
}

fn is_int(ty: &ValType, wanted: WasmIntType) -> bool {
    match wanted {
        WasmIntType::I32 => matches!(ty, ValType::I32),
        WasmIntType::I64 => matches!(ty, ValType::I64),
    }
}

fn type_name(ty: &ValType) -> String {
    match ty {
        ValType::I32 => "i32",
        ValType::I64 => "i64",
        ValType::F32 => "f32",
        ValType::F64 => "f64",
        ValType::V128 => "v128",
        ValType::Ref(_) => "ref",
    }
    .to_string()
}

/// Render a signature as `(i32, i32) -> i32`.
fn describe_signature(
    params: impl IntoIterator<Item = String>,
    results: impl IntoIterator<Item = String>,
) -> String {
    let params = params.into_iter().collect::<Vec<_>>().join(", ");
    let results = results.into_iter().collect::<Vec<_>>();
    match results.as_slice() {
        [] => format!("({params}) -> ()"),
        [single] => format!("({params}) -> {single}"),
        many => format!("({params}) -> ({})", many.join(", ")),
    }
}
