use std::fmt;

pub const DEFAULT_OVERLOAD: &str = "default";

/// Fully qualified operator identity: `namespace::name.overload`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperatorName {
    pub namespace: String,
    pub name: String,
    pub overload: String,
}

impl OperatorName {
    /// Builds a name, stripping a redundant `ns::` prefix from `name` and mapping an
    /// empty overload to `default`.
    pub fn new(namespace: impl Into<String>, name: &str, overload: &str) -> Self {
        let name = match name.find("::") {
            Some(pos) => &name[pos + 2..],
            None => name,
        };
        Self {
            namespace: namespace.into(),
            name: name.to_string(),
            overload: if overload.is_empty() {
                DEFAULT_OVERLOAD.to_string()
            } else {
                overload.to_string()
            },
        }
    }

    /// Parses `ns::op` or `ns::op.overload`.
    pub fn parse(qualified: &str) -> Option<Self> {
        let (namespace, rest) = qualified.split_once("::")?;
        if namespace.is_empty() || rest.is_empty() {
            return None;
        }
        let (name, overload) = rest.split_once('.').unwrap_or((rest, ""));
        Some(Self::new(namespace, name, overload))
    }

    pub fn qualified(&self) -> String {
        format!("{}::{}", self.namespace, self.name)
    }
}

impl fmt::Display for OperatorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}.{}", self.namespace, self.name, self.overload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgType {
    Tensor,
    OptionalTensor,
    TensorList,
    OptionalTensorList,
    Scalar,
    Int,
    Float,
    Bool,
    IntList,
    Str,
}

impl ArgType {
    /// Number-like declarations whose runtime value is fingerprinted by value.
    pub fn is_number(self) -> bool {
        matches!(
            self,
            ArgType::Scalar | ArgType::Int | ArgType::Float | ArgType::Bool
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    pub name: String,
    pub ty: ArgType,
    pub kwarg_only: bool,
}

impl Argument {
    pub fn positional(name: impl Into<String>, ty: ArgType) -> Self {
        Self {
            name: name.into(),
            ty,
            kwarg_only: false,
        }
    }

    pub fn keyword(name: impl Into<String>, ty: ArgType) -> Self {
        Self {
            name: name.into(),
            ty,
            kwarg_only: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnType {
    Tensor,
    TensorList,
    Scalar,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorSchema {
    pub name: OperatorName,
    pub arguments: Vec<Argument>,
    pub returns: Vec<ReturnType>,
}

impl OperatorSchema {
    pub fn new(name: OperatorName, arguments: Vec<Argument>, returns: Vec<ReturnType>) -> Self {
        Self {
            name,
            arguments,
            returns,
        }
    }

    /// Only operators returning exactly one tensor can be served from the cache.
    pub fn returns_single_tensor(&self) -> bool {
        matches!(self.returns.as_slice(), [ReturnType::Tensor])
    }
}
