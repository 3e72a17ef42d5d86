//! Functions and classes served by `sealrpc serve`.

use std::any::Any;
use std::time::Duration;

use sealrpc_common::Value;
use sealrpc_server::{CallArgs, CallError, RegistrationError, RemoteObject, Returned, RouteTable, RpcModule};

/// Longest sleep `slow` accepts.
const MAX_SLOW_MS: i64 = 60_000;

/// A counter clients drive through a proxy.
#[derive(Debug, Default)]
pub struct Counter {
    count: i64,
}

impl RemoteObject for Counter {
    fn type_tag(&self) -> &str {
        "Counter"
    }

    fn methods(&self) -> Vec<String> {
        vec!["increment".to_string(), "reset".to_string()]
    }

    fn attributes(&self) -> Vec<String> {
        vec!["count".to_string()]
    }

    fn call_method(&mut self, name: &str, args: CallArgs) -> Result<Returned, CallError> {
        match name {
            "increment" => {
                let by = if args.is_empty() { 1 } else { args.i64(0)? };
                self.count += by;
                Ok(Returned::value(self.count))
            }
            "reset" => {
                self.count = 0;
                Ok(Returned::nil())
            }
            _ => Err(CallError::no_method("Counter", name)),
        }
    }

    fn get_attribute(&self, name: &str) -> Result<Value, CallError> {
        match name {
            "count" => Ok(Value::from(self.count)),
            _ => Err(CallError::no_attribute("Counter", name)),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn add(args: CallArgs) -> Result<Returned, CallError> {
    match (args.value(0)?, args.value(1)?) {
        (Value::Int(a), Value::Int(b)) => a
            .checked_add(*b)
            .map(Returned::value)
            .ok_or_else(|| CallError::failed("integer overflow")),
        _ => Ok(Returned::value(args.f64(0)? + args.f64(1)?)),
    }
}

fn echo(args: CallArgs) -> Result<Returned, CallError> {
    let mut values = Vec::with_capacity(args.len());
    for index in 0..args.len() {
        values.push(args.value(index)?.clone());
    }
    match values.len() {
        1 => Ok(Returned::Value(values.remove(0))),
        _ => Ok(Returned::Value(Value::List(values))),
    }
}

fn slow(args: CallArgs) -> Result<Returned, CallError> {
    let ms = args.i64(0)?;
    if !(0..=MAX_SLOW_MS).contains(&ms) {
        return Err(CallError::invalid_argument(format!(
            "sleep must be between 0 and {} ms",
            MAX_SLOW_MS
        )));
    }
    std::thread::sleep(Duration::from_millis(ms as u64));
    Ok(Returned::value(ms))
}

pub fn module() -> RpcModule {
    RpcModule::new("demo")
        .function("add", add)
        .function("echo", echo)
        .function("slow", slow)
        .class("Counter", |args: CallArgs| {
            let count = if args.is_empty() { 0 } else { args.i64(0)? };
            Ok(Counter { count })
        })
}

/// Routing table with the demo module registered.
pub fn routes() -> Result<RouteTable, RegistrationError> {
    let mut routes = RouteTable::new();
    routes.register_module(module())?;
    Ok(routes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(routes: &RouteTable, name: &str, args: Vec<Value>) -> Result<Returned, CallError> {
        let handler = routes.function(name).unwrap();
        handler(CallArgs::from_values(args))
    }

    fn value(returned: Returned) -> Value {
        match returned {
            Returned::Value(value) => value,
            _ => panic!("expected a plain value"),
        }
    }

    #[test]
    fn test_demo_contract() {
        let routes = routes().unwrap();
        assert_eq!(routes.function_names(), vec!["add", "echo", "slow"]);
        assert_eq!(routes.class_names(), vec!["Counter"]);
    }

    #[test]
    fn test_add_ints_and_floats() {
        let routes = routes().unwrap();
        let sum = call(&routes, "add", vec![Value::from(2), Value::from(3)]).unwrap();
        assert_eq!(value(sum), Value::from(5));
        let sum = call(&routes, "add", vec![Value::from(1.5), Value::from(2)]).unwrap();
        assert_eq!(value(sum), Value::from(3.5));
    }

    #[test]
    fn test_add_overflow_fails() {
        let routes = routes().unwrap();
        let err = call(&routes, "add", vec![Value::from(i64::MAX), Value::from(1)]).unwrap_err();
        assert!(matches!(err, CallError::Failed(_)));
    }

    #[test]
    fn test_echo() {
        let routes = routes().unwrap();
        let one = call(&routes, "echo", vec![Value::from("hi")]).unwrap();
        assert_eq!(value(one), Value::from("hi"));
        let many = call(&routes, "echo", vec![Value::from(1), Value::from(2)]).unwrap();
        assert_eq!(value(many), Value::List(vec![Value::from(1), Value::from(2)]));
    }

    #[test]
    fn test_slow_rejects_out_of_range() {
        let routes = routes().unwrap();
        let err = call(&routes, "slow", vec![Value::from(-1)]).unwrap_err();
        assert!(matches!(err, CallError::InvalidArgument(_)));
    }

    #[test]
    fn test_counter() {
        let mut counter = Counter::default();
        counter.call_method("increment", CallArgs::from_values(vec![])).unwrap();
        counter
            .call_method("increment", CallArgs::from_values(vec![Value::from(4)]))
            .unwrap();
        assert_eq!(counter.get_attribute("count").unwrap(), Value::from(5));
        assert!(counter.call_method("fly", CallArgs::from_values(vec![])).is_err());
    }
}
