//! Demo service implementations offered by the server binary.
//!
//! The registry configuration refers to these by implementation id, e.g.
//! `{"math": "demo.math"}`.

use rand::Rng;
use seqrpc::{Service, ServiceCatalog};
use std::time::Duration;

/// Every implementation this binary can serve.
pub fn catalog() -> ServiceCatalog {
    ServiceCatalog::new()
        .with("demo.math", math)
        .with("demo.clock", clock)
        .with("demo.echo", echo)
}

fn math() -> Service {
    Service::new("math")
        .method("add", |a: i64, b: i64| a + b)
        .method("add", |a: f64, b: f64| a + b)
        .method("div", |a: i64, b: i64| {
            a.checked_div(b)
                .ok_or_else(|| format!("cannot divide {} by {}", a, b))
        })
}

fn clock() -> Service {
    Service::new("clock")
        .method("sleep", |ms: i64| {
            std::thread::sleep(Duration::from_millis(ms.max(0) as u64));
        })
        .method("now", || chrono::Local::now().to_rfc3339())
}

fn echo() -> Service {
    Service::new("echo")
        .method("echo", |n: i64| {
            let pause = rand::rng().random_range(0..=50);
            std::thread::sleep(Duration::from_millis(pause));
            n
        })
        .method("echo", |s: String| s)
        .method("len", |bytes: Vec<u8>| bytes.len() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqrpc::{Request, ServiceRegistry, Value};
    use std::collections::BTreeMap;

    fn registry() -> ServiceRegistry {
        let entries: BTreeMap<String, String> = [
            ("math".to_string(), "demo.math".to_string()),
            ("clock".to_string(), "demo.clock".to_string()),
            ("echo".to_string(), "demo.echo".to_string()),
        ]
        .into_iter()
        .collect();
        ServiceRegistry::from_entries(&entries, &catalog())
    }

    fn invoke(registry: &ServiceRegistry, request: Request) -> Result<Option<Value>, String> {
        let invoker = registry.resolve(&request).map_err(|fault| fault.message)?;
        invoker.invoke(&request.params)
    }

    #[test]
    fn test_math() {
        let registry = registry();
        let add = Request::new(1, "math", "add", vec![Value::Int(2), Value::Int(3)]);
        assert_eq!(invoke(&registry, add), Ok(Some(Value::Int(5))));

        let add = Request::new(2, "math", "add", vec![Value::Float(0.5), Value::Float(0.25)]);
        assert_eq!(invoke(&registry, add), Ok(Some(Value::Float(0.75))));

        let div = Request::new(3, "math", "div", vec![Value::Int(7), Value::Int(0)]);
        assert!(invoke(&registry, div).unwrap_err().contains("divide"));
    }

    #[test]
    fn test_clock() {
        let registry = registry();
        let sleep = Request::new(1, "clock", "sleep", vec![Value::Int(1)]);
        assert_eq!(invoke(&registry, sleep), Ok(None));

        let now = Request::new(2, "clock", "now", vec![]);
        let stamp = invoke(&registry, now).unwrap().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp.as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_echo() {
        let registry = registry();
        let echo = Request::new(1, "echo", "echo", vec![Value::Int(42)]);
        assert_eq!(invoke(&registry, echo), Ok(Some(Value::Int(42))));

        let echo = Request::new(2, "echo", "echo", vec![Value::Str("hi".into())]);
        assert_eq!(invoke(&registry, echo), Ok(Some(Value::Str("hi".into()))));

        let len = Request::new(3, "echo", "len", vec![Value::Bytes(vec![1, 2, 3])]);
        assert_eq!(invoke(&registry, len), Ok(Some(Value::Int(3))));
    }
}
