// Shared fixtures for the server tests.

#![allow(dead_code)]

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sealrpc_common::Value;
use sealrpc_server::{CallArgs, CallError, RemoteObject, Returned, RouteTable, RpcModule};

pub const SECRET_MARKER: &str = "TOP-SECRET-PAYLOAD";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

pub struct Stats {
    pub resets: i64,
}

impl RemoteObject for Stats {
    fn type_tag(&self) -> &str {
        "Stats"
    }

    fn methods(&self) -> Vec<String> {
        vec!["reset".to_string()]
    }

    fn attributes(&self) -> Vec<String> {
        vec!["resets".to_string()]
    }

    fn call_method(&mut self, name: &str, _args: CallArgs) -> Result<Returned, CallError> {
        match name {
            "reset" => {
                self.resets += 1;
                Ok(Returned::value(self.resets))
            }
            _ => Err(CallError::no_method("Stats", name)),
        }
    }

    fn get_attribute(&self, name: &str) -> Result<Value, CallError> {
        match name {
            "resets" => Ok(Value::from(self.resets)),
            _ => Err(CallError::no_attribute("Stats", name)),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Counter with a nested `stats` member that counts its teardowns.
pub struct Counter {
    pub count: i64,
    pub stats: Stats,
    pub teardowns: Arc<AtomicUsize>,
}

impl RemoteObject for Counter {
    fn type_tag(&self) -> &str {
        "Counter"
    }

    fn methods(&self) -> Vec<String> {
        vec!["increment".to_string(), "add_from".to_string(), "explode".to_string()]
    }

    fn attributes(&self) -> Vec<String> {
        vec!["count".to_string()]
    }

    fn call_method(&mut self, name: &str, args: CallArgs) -> Result<Returned, CallError> {
        match name {
            "increment" => {
                let by = match args.kwarg("by") {
                    Some(arg) => arg
                        .as_value()
                        .and_then(Value::as_i64)
                        .ok_or_else(|| CallError::invalid_argument("'by' must be an int"))?,
                    None => 1,
                };
                self.count += by;
                Ok(Returned::value(self.count))
            }
            "add_from" => {
                let other = args.object(0)?.with::<Counter, _>(|other| other.count)?;
                self.count += other;
                Ok(Returned::value(self.count))
            }
            "explode" => panic!("counter exploded"),
            _ => Err(CallError::no_method("Counter", name)),
        }
    }

    fn get_attribute(&self, name: &str) -> Result<Value, CallError> {
        match name {
            "count" => Ok(Value::from(self.count)),
            _ => Err(CallError::no_attribute("Counter", name)),
        }
    }

    fn member_mut(&mut self, name: &str) -> Option<&mut dyn RemoteObject> {
        match name {
            "stats" => Some(&mut self.stats),
            _ => None,
        }
    }

    fn teardown(&mut self) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn routes(teardowns: Arc<AtomicUsize>) -> RouteTable {
    let module = RpcModule::new("test")
        .function("add", |args| Ok(Returned::value(args.i64(0)? + args.i64(1)?)))
        .function("echo", |args| Ok(Returned::value(args.value(0)?.clone())))
        .function("fail", |_| Err(CallError::failed("deliberate failure")))
        .function("boom", |_| panic!("handler blew up"))
        .function("slow", |args| {
            std::thread::sleep(Duration::from_millis(args.i64(0)? as u64));
            Ok(Returned::value("done"))
        })
        .function("make_secret", |_| {
            Ok(Returned::secret_value("Credentials", SECRET_MARKER.to_string()))
        })
        .function("secret_len", |args| {
            let len = args.object(0)?.with::<String, _>(|s| s.len() as i64)?;
            Ok(Returned::value(len))
        })
        .function("make_point", |args| {
            Ok(Returned::custom("point", Point { x: args.i64(0)?, y: args.i64(1)? }))
        })
        .function("point_sum", |args| {
            let point = args.custom::<Point>(0)?;
            Ok(Returned::value(point.x + point.y))
        })
        .function("pair", |_| {
            Ok(Returned::tuple(vec![
                Returned::secret_value("Credentials", SECRET_MARKER.to_string()),
                Returned::value(7),
            ]))
        })
        .function("broken_pair", |_| {
            Ok(Returned::tuple(vec![
                Returned::secret_value("Credentials", SECRET_MARKER.to_string()),
                Returned::custom("unregistered", 1u8),
            ]))
        });

    let teardowns_for_class = teardowns.clone();
    let mut routes = RouteTable::new();
    routes.register_module(module).unwrap();
    routes
        .register_class("Counter", move |args| {
            let start = match args.args.first() {
                Some(_) => args.i64(0)?,
                None => 0,
            };
            Ok(Counter {
                count: start,
                stats: Stats { resets: 0 },
                teardowns: teardowns_for_class.clone(),
            })
        })
        .unwrap();
    routes.register_serde::<Point>("point").unwrap();
    routes
}
