//! Method descriptors, typed handler adapters and parameter binding.
//!
//! A [`Method`] pairs a wire name with an ordered parameter list and a typed
//! async handler. Handlers are plain async closures taking a
//! [`RequestContext`] plus up to four `Deserialize`-able arguments; the
//! [`IntoHandler`] adapter erases them behind a uniform boxed signature and
//! the declared parameter list drives binding of positional or named params.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::context::RequestContext;
use crate::error::ErrorObject;
use crate::request::Params;

/// One declared parameter of a method.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: &'static str,
    pub optional: bool,
}

impl Parameter {
    pub fn required(name: &'static str) -> Self {
        Self {
            name,
            optional: false,
        }
    }

    pub fn optional(name: &'static str) -> Self {
        Self {
            name,
            optional: true,
        }
    }
}

type HandlerFuture = BoxFuture<'static, Result<Value, ErrorObject>>;
pub(crate) type HandlerFn = Arc<dyn Fn(RequestContext, Vec<Value>) -> HandlerFuture + Send + Sync>;

/// Hook run over every bound argument before the handler is invoked.
/// Binding succeeds only if the validator accepts each value.
pub trait ParamValidator: Send + Sync {
    fn validate(&self, param: &str, value: &Value) -> Result<(), String>;
}

/// A registered RPC method: name, declared parameters and handler.
pub struct Method {
    pub name: &'static str,
    pub params: Vec<Parameter>,
    allow_unknown_params: bool,
    handler: HandlerFn,
}

impl Method {
    /// Build a method from a typed async handler. The handler arity must
    /// match the declared parameter list.
    pub fn new<F, Args>(name: &'static str, params: Vec<Parameter>, handler: F) -> Self
    where
        F: IntoHandler<Args>,
    {
        assert_eq!(
            params.len(),
            F::ARITY,
            "method {name}: declared parameters must match handler arity",
        );
        Self {
            name,
            params,
            allow_unknown_params: false,
            handler: handler.into_handler(),
        }
    }

    /// Accept named params that are not declared instead of rejecting them.
    pub fn allow_unknown_params(mut self) -> Self {
        self.allow_unknown_params = true;
        self
    }

    pub(crate) fn invoke(&self, ctx: RequestContext, args: Vec<Value>) -> HandlerFuture {
        (self.handler)(ctx, args)
    }

    /// Bind request params against the declared parameter list, yielding one
    /// value per declared parameter (omitted optionals become `null`).
    pub(crate) fn bind_params(
        &self,
        params: Option<&Params>,
        validator: Option<&dyn ParamValidator>,
    ) -> Result<Vec<Value>, ErrorObject> {
        let bound = match params {
            None => {
                if let Some(missing) = self.params.iter().find(|p| !p.optional) {
                    return Err(ErrorObject::invalid_params()
                        .with_data(format!("missing non-optional param: {}", missing.name)));
                }
                vec![Value::Null; self.params.len()]
            }
            Some(Params::Array(values)) => {
                if values.len() > self.params.len() {
                    return Err(ErrorObject::invalid_params().with_data(format!(
                        "expected at most {} params, got {}",
                        self.params.len(),
                        values.len()
                    )));
                }
                let mut bound = Vec::with_capacity(self.params.len());
                for (index, param) in self.params.iter().enumerate() {
                    match values.get(index) {
                        Some(value) => bound.push(value.clone()),
                        None if param.optional => bound.push(Value::Null),
                        None => {
                            return Err(ErrorObject::invalid_params()
                                .with_data(format!("missing non-optional param: {}", param.name)))
                        }
                    }
                }
                bound
            }
            Some(Params::Object(map)) => {
                let mut unknown: HashSet<&str> = map.keys().map(String::as_str).collect();
                let mut bound = Vec::with_capacity(self.params.len());
                for param in &self.params {
                    match map.get(param.name) {
                        Some(value) => {
                            unknown.remove(param.name);
                            bound.push(value.clone());
                        }
                        None if param.optional => bound.push(Value::Null),
                        None => {
                            return Err(ErrorObject::invalid_params()
                                .with_data(format!("missing non-optional param: {}", param.name)))
                        }
                    }
                }
                if !self.allow_unknown_params {
                    if let Some(name) = unknown.into_iter().next() {
                        return Err(ErrorObject::invalid_params()
                            .with_data(format!("unknown param: {name}")));
                    }
                }
                bound
            }
        };

        if let Some(validator) = validator {
            for (param, value) in self.params.iter().zip(&bound) {
                validator.validate(param.name, value).map_err(|reason| {
                    ErrorObject::invalid_params().with_data(format!("{}: {reason}", param.name))
                })?;
            }
        }

        Ok(bound)
    }
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Name-keyed method table, populated before the server starts serving.
#[derive(Debug, Default)]
pub struct MethodRegistry {
    methods: HashMap<&'static str, Method>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("method {0} is already registered")]
    DuplicateMethod(&'static str),
}

impl MethodRegistry {
    pub fn register(&mut self, method: Method) -> Result<(), RegistryError> {
        if self.methods.contains_key(method.name) {
            return Err(RegistryError::DuplicateMethod(method.name));
        }
        self.methods.insert(method.name, method);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }
}

/// Adapter from typed async closures to the boxed handler signature.
pub trait IntoHandler<Args>: Send + Sync + 'static {
    const ARITY: usize;

    fn into_handler(self) -> HandlerFn;
}

macro_rules! impl_into_handler {
    ($arity:expr $(, $arg:ident)*) => {
        impl<Func, Fut, Ret $(, $arg)*> IntoHandler<($($arg,)*)> for Func
        where
            Func: Fn(RequestContext $(, $arg)*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<Ret, ErrorObject>> + Send + 'static,
            Ret: Serialize,
            $($arg: DeserializeOwned + Send + 'static,)*
        {
            const ARITY: usize = $arity;

            #[allow(non_snake_case, unused_variables, unused_mut)]
            fn into_handler(self) -> HandlerFn {
                let func = Arc::new(self);
                Arc::new(move |ctx: RequestContext, args: Vec<Value>| {
                    let func = Arc::clone(&func);
                    Box::pin(async move {
                        let mut args = args.into_iter().enumerate();
                        $(
                            let $arg: $arg = {
                                let (index, value) =
                                    args.next().expect("bound args match declared arity");
                                serde_json::from_value(value).map_err(|err| {
                                    ErrorObject::invalid_params()
                                        .with_data(format!("param {index}: {err}"))
                                })?
                            };
                        )*
                        let ret = func(ctx $(, $arg)*).await?;
                        serde_json::to_value(ret)
                            .map_err(|err| ErrorObject::internal_error().with_data(err.to_string()))
                    })
                })
            }
        }
    };
}

impl_into_handler!(0);
impl_into_handler!(1, A1);
impl_into_handler!(2, A1, A2);
impl_into_handler!(3, A1, A2, A3);
impl_into_handler!(4, A1, A2, A3, A4);
