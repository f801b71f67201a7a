//! Services and their method tables.
//!
//! A `Service` maps `(method name, parameter kinds)` to an invoker built from a
//! plain Rust closure at registration time. Dispatch is a table lookup on the
//! kinds observed in the request, so overloads by signature are supported.

use crate::value::{format_signature, FromValue, IntoReply, Value, ValueKind};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Type-erased method body.
pub trait Invoke: Send + Sync + 'static {
    fn invoke(&self, params: &[Value]) -> Result<Option<Value>, String>;
}

/// A closure usable as a service method.
///
/// Implemented for `Fn` closures of up to four parameters whose types
/// implement `FromValue` and whose return type implements `IntoReply`. `Args`
/// is the tuple of parameter types and only serves to tell the impls apart.
pub trait Handler<Args>: Send + Sync + 'static {
    fn signature() -> Vec<ValueKind>;

    fn call(&self, params: &[Value]) -> Result<Option<Value>, String>;
}

macro_rules! impl_handler {
    ($($arg:ident),*) => {
        impl<F, R, $($arg,)*> Handler<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            R: IntoReply,
            $($arg: FromValue,)*
        {
            fn signature() -> Vec<ValueKind> {
                vec![$(<$arg as FromValue>::KIND),*]
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn call(&self, params: &[Value]) -> Result<Option<Value>, String> {
                let expected = <Self as Handler<($($arg,)*)>>::signature().len();
                if params.len() != expected {
                    return Err(format!(
                        "expected {} parameters, got {}",
                        expected,
                        params.len()
                    ));
                }

                let mut params = params.iter();
                $(
                    let $arg = params
                        .next()
                        .and_then(<$arg as FromValue>::from_value)
                        .ok_or_else(|| {
                            format!("parameter kind mismatch, expected {}", <$arg as FromValue>::KIND)
                        })?;
                )*

                (self)($($arg),*).into_reply()
            }
        }
    };
}

impl_handler!();
impl_handler!(A1);
impl_handler!(A1, A2);
impl_handler!(A1, A2, A3);
impl_handler!(A1, A2, A3, A4);

struct HandlerInvoker<H, Args> {
    handler: H,
    _args: std::marker::PhantomData<fn(Args)>,
}

impl<H, Args> Invoke for HandlerInvoker<H, Args>
where
    H: Handler<Args>,
    Args: 'static,
{
    fn invoke(&self, params: &[Value]) -> Result<Option<Value>, String> {
        self.handler.call(params)
    }
}

/// Lookup key into a service's method table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub name: String,
    pub signature: Vec<ValueKind>,
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, format_signature(&self.signature))
    }
}

/// A named service exposing callable methods.
pub struct Service {
    name: String,
    methods: HashMap<MethodKey, Arc<dyn Invoke>>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    /// Register a method. A later registration with the same name and
    /// signature replaces the earlier one.
    pub fn method<Args, H>(mut self, name: impl Into<String>, handler: H) -> Self
    where
        H: Handler<Args>,
        Args: 'static,
    {
        let key = MethodKey {
            name: name.into(),
            signature: H::signature(),
        };
        let invoker = HandlerInvoker {
            handler,
            _args: std::marker::PhantomData,
        };
        self.methods.insert(key, Arc::new(invoker));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve a method by name and the kinds of the supplied parameters.
    pub fn resolve(&self, method: &str, signature: &[ValueKind]) -> Option<Arc<dyn Invoke>> {
        let key = MethodKey {
            name: method.to_string(),
            signature: signature.to_vec(),
        };
        self.methods.get(&key).cloned()
    }

    /// Whether any overload of `method` exists.
    pub fn has_method(&self, method: &str) -> bool {
        self.methods.keys().any(|key| key.name == method)
    }

    /// All registered methods, sorted for display.
    pub fn methods(&self) -> Vec<MethodKey> {
        let mut keys: Vec<MethodKey> = self.methods.keys().cloned().collect();
        keys.sort_by(|a, b| a.name.cmp(&b.name).then(a.signature.cmp(&b.signature)));
        keys
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let methods: Vec<String> = self.methods().iter().map(ToString::to_string).collect();
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("methods", &methods)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn math() -> Service {
        Service::new("math")
            .method("add", |a: i64, b: i64| a + b)
            .method("add", |a: f64, b: f64| a + b)
            .method("div", |a: i64, b: i64| {
                if b == 0 {
                    Err("division by zero")
                } else {
                    Ok(a / b)
                }
            })
            .method("reset", || ())
    }

    #[test]
    fn test_resolve_by_signature() {
        let service = math();
        let add = service
            .resolve("add", &[ValueKind::Int, ValueKind::Int])
            .unwrap();
        assert_eq!(
            add.invoke(&[Value::Int(2), Value::Int(3)]),
            Ok(Some(Value::Int(5)))
        );

        let add = service
            .resolve("add", &[ValueKind::Float, ValueKind::Float])
            .unwrap();
        assert_eq!(
            add.invoke(&[Value::Float(0.5), Value::Float(0.25)]),
            Ok(Some(Value::Float(0.75)))
        );
    }

    #[test]
    fn test_unknown_signature_does_not_resolve() {
        let service = math();
        assert!(service.resolve("add", &[ValueKind::Str]).is_none());
        assert!(service.resolve("pow", &[ValueKind::Int, ValueKind::Int]).is_none());
        assert!(service.has_method("add"));
        assert!(!service.has_method("pow"));
    }

    #[test]
    fn test_method_error_becomes_message() {
        let service = math();
        let div = service
            .resolve("div", &[ValueKind::Int, ValueKind::Int])
            .unwrap();
        assert_eq!(
            div.invoke(&[Value::Int(1), Value::Int(0)]),
            Err("division by zero".to_string())
        );
    }

    #[test]
    fn test_void_method() {
        let service = math();
        let reset = service.resolve("reset", &[]).unwrap();
        assert_eq!(reset.invoke(&[]), Ok(None));
    }

    #[test]
    fn test_direct_invoke_checks_kinds() {
        let service = math();
        let add = service
            .resolve("add", &[ValueKind::Int, ValueKind::Int])
            .unwrap();
        assert!(add.invoke(&[Value::Int(1), Value::Str("x".into())]).is_err());
        assert!(add.invoke(&[Value::Int(1)]).is_err());
    }

    #[test]
    fn test_methods_listing() {
        let names: Vec<String> = math().methods().iter().map(ToString::to_string).collect();
        assert_eq!(
            names,
            vec!["add(int, int)", "add(float, float)", "div(int, int)", "reset()"]
        );
    }
}
