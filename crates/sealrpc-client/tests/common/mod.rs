// Shared fixtures for the client tests: a small routing table and a server
// harness that runs on its own runtime so blocking clients can talk to it.

#![allow(dead_code)]

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sealrpc_client::{Client, ClientConfig};
use sealrpc_common::auth::{AllowList, KeyPair};
use sealrpc_common::{SerializerRegistry, Value};
use sealrpc_server::{
    CallArgs, CallError, ObjectCache, RemoteObject, Returned, RouteTable, RpcModule, RunningServer, Server,
    ServerConfig,
};

pub const SECRET: &str = "hunter2-do-not-leak";

/// How long `block` holds its worker. Longer than any client timeout used
/// in these tests.
pub const BLOCK_FOR: Duration = Duration::from_millis(1500);

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

pub struct Counter {
    pub count: i64,
    pub stats: Stats,
    teardowns: Arc<AtomicUsize>,
}

impl RemoteObject for Counter {
    fn type_tag(&self) -> &str {
        "Counter"
    }

    fn methods(&self) -> Vec<String> {
        vec!["add_from".to_string(), "increment".to_string()]
    }

    fn attributes(&self) -> Vec<String> {
        vec!["count".to_string(), "stats".to_string()]
    }

    fn call_method(&mut self, name: &str, args: CallArgs) -> Result<Returned, CallError> {
        match name {
            "increment" => {
                self.count += 1;
                Ok(Returned::value(self.count))
            }
            "add_from" => {
                self.count += args.object(0)?.with::<Counter, _>(|other| other.count)?;
                Ok(Returned::value(self.count))
            }
            _ => Err(CallError::no_method("Counter", name)),
        }
    }

    fn get_attribute(&self, name: &str) -> Result<Value, CallError> {
        match name {
            "count" => Ok(Value::from(self.count)),
            "stats" => Ok(Value::Map([("resets".to_string(), Value::from(self.stats.resets))].into())),
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
    let module = RpcModule::new("client-tests")
        .function("add", |args| Ok(Returned::value(args.i64(0)? + args.i64(1)?)))
        .function("slow", |args| {
            std::thread::sleep(Duration::from_millis(args.i64(0)? as u64));
            Ok(Returned::value("done"))
        })
        .function("block", |_| {
            std::thread::sleep(BLOCK_FOR);
            Ok(Returned::value("late"))
        })
        .function("make_secret", |_| Ok(Returned::secret_value("Credentials", SECRET.to_string())))
        .function("secret_len", |args| {
            let len = args.object(0)?.with::<String, _>(|s| s.len() as i64)?;
            Ok(Returned::value(len))
        })
        .function("pair", |_| {
            Ok(Returned::tuple(vec![
                Returned::secret_value("Credentials", SECRET.to_string()),
                Returned::value(7),
            ]))
        })
        .function("make_point", |args| {
            Ok(Returned::custom("point", Point { x: args.i64(0)?, y: args.i64(1)? }))
        })
        .function("point_sum", |args| {
            let point = args.custom::<Point>(0)?;
            Ok(Returned::value(point.x + point.y))
        })
        .class("Counter", move |_| {
            Ok(Counter {
                count: 0,
                stats: Stats { resets: 0 },
                teardowns: teardowns.clone(),
            })
        });

    let mut routes = RouteTable::new();
    routes.register_module(module).unwrap();
    routes.register_serde::<Point>("point").unwrap();
    routes
}

pub fn point_serializers() -> SerializerRegistry {
    let mut serializers = SerializerRegistry::new();
    serializers.register_serde::<Point>("point").unwrap();
    serializers
}

pub struct TestKeys {
    pub server: KeyPair,
    pub client: KeyPair,
}

impl TestKeys {
    pub fn generate() -> Self {
        Self {
            server: KeyPair::generate().unwrap(),
            client: KeyPair::generate().unwrap(),
        }
    }
}

/// Starts a server on the current runtime.
pub async fn start_server(keys: &TestKeys, workers: usize, teardowns: Arc<AtomicUsize>) -> RunningServer {
    let config = ServerConfig::new().with_bind("127.0.0.1:0").with_workers(workers);
    let server = Server::with_keys(
        config,
        keys.server.clone(),
        AllowList::from_keys([keys.client.public]),
        routes(teardowns),
    )
    .start()
    .await
    .unwrap();
    // Let every worker finish connecting so round-robin covers all of them.
    tokio::time::sleep(Duration::from_millis(200)).await;
    server
}

pub fn client_config(server: &RunningServer, keys: &TestKeys) -> ClientConfig {
    ClientConfig::new(server.local_addr().to_string(), keys.server.public, keys.client.clone())
}

/// A server running on a dedicated runtime, shut down on drop.
pub struct TestServer {
    runtime: tokio::runtime::Runtime,
    server: Option<RunningServer>,
    pub keys: TestKeys,
    pub teardowns: Arc<AtomicUsize>,
}

impl TestServer {
    pub fn start(workers: usize) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        let keys = TestKeys::generate();
        let teardowns = Arc::new(AtomicUsize::new(0));
        let server = runtime.block_on(start_server(&keys, workers, teardowns.clone()));
        Self {
            runtime,
            server: Some(server),
            keys,
            teardowns,
        }
    }

    fn running(&self) -> &RunningServer {
        self.server.as_ref().unwrap()
    }

    pub fn config(&self) -> ClientConfig {
        client_config(self.running(), &self.keys)
    }

    pub fn client(&self) -> Client {
        Client::with_serializers(self.config(), point_serializers())
    }

    pub fn cache(&self) -> &Arc<ObjectCache> {
        self.running().cache()
    }

    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            self.runtime.block_on(server.shutdown());
        }
    }
}
