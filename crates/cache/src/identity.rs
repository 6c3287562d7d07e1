//! Callable identity extraction
//!
//! A [`Callable`] is either a plain [`Function`] or a partial application of
//! another callable. [`Callable::identity`] unwraps the bindings down to the
//! function and folds the bound arguments into an [`Identity`], which is what
//! gets hashed into a fingerprint.

use crate::error::BoxError;
use crate::value::Value;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Keyword arguments
pub type Kwargs = BTreeMap<String, serde_json::Value>;

type Body = dyn Fn(&Arguments) -> std::result::Result<Value, BoxError> + Send + Sync;

/// Build a body-less [`Function`] named after an identifier in the current module
///
/// ```
/// let f = memento_cache::function!(load_sst);
/// assert!(f.qualified_name().ends_with("::load_sst"));
/// ```
#[macro_export]
macro_rules! function {
    ($name:ident) => {
        $crate::Function::new(
            module_path!(),
            concat!(module_path!(), "::", stringify!($name)),
        )
    };
}

/// A declared parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    /// Parameter name
    pub name: String,
    /// Default value; `None` means the parameter is required
    pub default: Option<serde_json::Value>,
    /// Merge a caller-supplied object into the default instead of replacing it
    pub merge: bool,
}

impl Param {
    /// A required parameter
    #[must_use]
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
            merge: false,
        }
    }

    /// A parameter with a default value
    #[must_use]
    pub fn optional(name: impl Into<String>, default: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            default: Some(default),
            merge: false,
        }
    }

    /// An object parameter whose caller value is merged over `default`
    #[must_use]
    pub fn merged(name: impl Into<String>, default: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            default: Some(default),
            merge: true,
        }
    }
}

/// A computation and the metadata that identifies it
#[derive(Clone)]
pub struct Function {
    module: String,
    qualified_name: String,
    source: String,
    params: Vec<Param>,
    variadic: bool,
    body: Option<Arc<Body>>,
}

impl Function {
    /// Declare a function; it is not callable until a body is attached
    #[must_use]
    pub fn new(module: impl Into<String>, qualified_name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            qualified_name: qualified_name.into(),
            source: String::new(),
            params: Vec::new(),
            variadic: false,
            body: None,
        }
    }

    /// Source text or version tag; any change invalidates cached results
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Append a declared parameter
    #[must_use]
    pub fn with_param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Accept positional arguments beyond the declared parameters
    #[must_use]
    pub const fn variadic(mut self, variadic: bool) -> Self {
        self.variadic = variadic;
        self
    }

    /// Attach the body
    #[must_use]
    pub fn with_body<F>(mut self, body: F) -> Self
    where
        F: Fn(&Arguments) -> std::result::Result<Value, BoxError> + Send + Sync + 'static,
    {
        self.body = Some(Arc::new(body));
        self
    }

    /// Module path
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Fully qualified name
    #[must_use]
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// Unqualified name
    #[must_use]
    pub fn name(&self) -> &str {
        self.qualified_name
            .rsplit("::")
            .next()
            .unwrap_or(&self.qualified_name)
    }

    /// Declared parameters
    #[must_use]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Whether a body is attached
    #[must_use]
    pub fn is_callable(&self) -> bool {
        self.body.is_some()
    }

    fn ensure_callable(&self) -> Result<&Body> {
        self.body.as_deref().ok_or_else(|| Error::NotCallable {
            name: self.qualified_name.clone(),
        })
    }

    fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Name positional arguments, merge objects and check keywords
    fn bind(
        &self,
        positional: Vec<serde_json::Value>,
        mut kwargs: Kwargs,
    ) -> Result<(Kwargs, Vec<serde_json::Value>)> {
        let mut varargs = Vec::new();
        for (index, arg) in positional.into_iter().enumerate() {
            match self.params.get(index) {
                Some(param) if kwargs.contains_key(&param.name) => {
                    return Err(Error::invalid_arguments(
                        &self.qualified_name,
                        format!("multiple values for argument '{}'", param.name),
                    ));
                }
                Some(param) => {
                    kwargs.insert(param.name.clone(), arg);
                }
                None if self.variadic => varargs.push(arg),
                None => {
                    return Err(Error::invalid_arguments(
                        &self.qualified_name,
                        format!(
                            "takes {} positional arguments but more were given",
                            self.params.len()
                        ),
                    ));
                }
            }
        }

        for (name, value) in &mut kwargs {
            let param = self.param(name).ok_or_else(|| {
                Error::invalid_arguments(
                    &self.qualified_name,
                    format!("unexpected keyword argument '{name}'"),
                )
            })?;
            if param.merge {
                *value = self.merge_object(param, value.take())?;
            }
        }
        Ok((kwargs, varargs))
    }

    fn merge_object(
        &self,
        param: &Param,
        supplied: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let mut merged = match &param.default {
            Some(serde_json::Value::Object(defaults)) => defaults.clone(),
            _ => serde_json::Map::new(),
        };
        let serde_json::Value::Object(supplied) = supplied else {
            return Err(Error::invalid_arguments(
                &self.qualified_name,
                format!("argument '{}' must be an object", param.name),
            ));
        };
        merged.extend(supplied);
        Ok(serde_json::Value::Object(merged))
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("qualified_name", &self.qualified_name)
            .field("params", &self.params)
            .field("variadic", &self.variadic)
            .field("callable", &self.body.is_some())
            .finish_non_exhaustive()
    }
}

/// A function, possibly with partially applied arguments
#[derive(Debug, Clone)]
pub enum Callable {
    /// A plain function
    Direct(Function),
    /// A partial application of another callable
    Bound {
        /// Callable being partially applied
        inner: Box<Callable>,
        /// Bound positional arguments
        args: Vec<serde_json::Value>,
        /// Bound keyword arguments
        kwargs: Kwargs,
    },
}

impl From<Function> for Callable {
    fn from(function: Function) -> Self {
        Self::Direct(function)
    }
}

impl Callable {
    /// Partially apply arguments
    #[must_use]
    pub fn bind(self, args: Vec<serde_json::Value>, kwargs: Kwargs) -> Self {
        Self::Bound {
            inner: Box::new(self),
            args,
            kwargs,
        }
    }

    /// The innermost function
    #[must_use]
    pub fn function(&self) -> &Function {
        match self {
            Self::Direct(function) => function,
            Self::Bound { inner, .. } => inner.function(),
        }
    }

    /// Bound arguments folded from the innermost binding outwards
    fn bound(&self) -> (Vec<serde_json::Value>, Kwargs) {
        match self {
            Self::Direct(_) => (Vec::new(), Kwargs::new()),
            Self::Bound {
                inner,
                args,
                kwargs,
            } => {
                let (mut all_args, mut all_kwargs) = inner.bound();
                all_args.extend(args.iter().cloned());
                all_kwargs.extend(kwargs.iter().map(|(k, v)| (k.clone(), v.clone())));
                (all_args, all_kwargs)
            }
        }
    }

    /// Identity of this callable, including its bound arguments
    pub fn identity(&self) -> Result<Identity> {
        let function = self.function();
        function.ensure_callable()?;
        let (args, kwargs) = self.bound();
        let (kwargs, varargs) = function.bind(args, kwargs)?;
        Ok(Identity {
            module: function.module.clone(),
            qualified_name: function.qualified_name.clone(),
            source: function.source.clone(),
            varargs,
            kwargs,
        })
    }

    /// Resolve bound and call arguments against the declared parameters
    pub fn resolve(&self, args: &[serde_json::Value], kwargs: &Kwargs) -> Result<Arguments> {
        let function = self.function();
        let (mut all_args, mut all_kwargs) = self.bound();
        all_args.extend(args.iter().cloned());
        all_kwargs.extend(kwargs.iter().map(|(k, v)| (k.clone(), v.clone())));
        let (mut named, varargs) = function.bind(all_args, all_kwargs)?;

        for param in &function.params {
            if named.contains_key(&param.name) {
                continue;
            }
            match &param.default {
                Some(default) => {
                    named.insert(param.name.clone(), default.clone());
                }
                None => {
                    return Err(Error::invalid_arguments(
                        &function.qualified_name,
                        format!("missing required argument '{}'", param.name),
                    ));
                }
            }
        }
        Ok(Arguments { named, varargs })
    }

    /// Invoke the function body
    pub fn call(&self, args: &[serde_json::Value], kwargs: &Kwargs) -> Result<Value> {
        let function = self.function();
        let body = function.ensure_callable()?;
        let arguments = self.resolve(args, kwargs)?;
        tracing::trace!(function = %function.qualified_name, "Calling computation");
        body(&arguments).map_err(|source| Error::Computation {
            name: function.qualified_name.clone(),
            source,
        })
    }
}

/// What identifies a callable: where it lives, its source and its bound arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Module path
    pub module: String,
    /// Fully qualified name
    pub qualified_name: String,
    /// Source text or version tag
    pub source: String,
    /// Bound positional arguments beyond the declared parameters
    pub varargs: Vec<serde_json::Value>,
    /// Bound keyword arguments, positional bindings included by name
    pub kwargs: Kwargs,
}

/// Fully resolved arguments handed to a function body
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Arguments {
    /// Every declared parameter, by name
    pub named: Kwargs,
    /// Extra positional arguments of variadic functions
    pub varargs: Vec<serde_json::Value>,
}

impl Arguments {
    /// Raw value of a named argument
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&serde_json::Value> {
        self.named.get(name)
    }

    /// Decode a named argument
    pub fn get<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self
            .named
            .get(name)
            .ok_or_else(|| Error::invalid_arguments(name, "argument not supplied"))?;
        serde_json::from_value(value.clone()).map_err(|e| {
            Error::invalid_arguments(name, format!("argument has the wrong type: {e}"))
        })
    }
}
