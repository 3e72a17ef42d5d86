//! Remote objects: values that live in the server's object cache and are
//! driven by the client through Secret/Proxy handles.

use std::any::Any;

use sealrpc_common::Value;

use crate::routes::{CallArgs, CallError, Returned};

/// An object a client can hold a handle to.
///
/// Implementations are constructed by registered classes, or returned from
/// functions and methods wrapped in [`Returned::Secret`] or
/// [`Returned::Proxy`]. The object never leaves the server; clients only
/// see its id and [`type_tag`](RemoteObject::type_tag).
///
/// # Example
///
/// ```
/// use std::any::Any;
/// use sealrpc_common::Value;
/// use sealrpc_server::{CallArgs, CallError, RemoteObject, Returned};
///
/// #[derive(Default)]
/// struct Counter {
///     count: i64,
/// }
///
/// impl RemoteObject for Counter {
///     fn type_tag(&self) -> &str {
///         "Counter"
///     }
///
///     fn methods(&self) -> Vec<String> {
///         vec!["increment".to_string()]
///     }
///
///     fn call_method(&mut self, name: &str, _args: CallArgs) -> Result<Returned, CallError> {
///         match name {
///             "increment" => {
///                 self.count += 1;
///                 Ok(Returned::value(self.count))
///             }
///             _ => Err(CallError::no_method(self.type_tag(), name)),
///         }
///     }
///
///     fn as_any(&self) -> &dyn Any {
///         self
///     }
/// }
/// ```
pub trait RemoteObject: Send + 'static {
    /// Type name reported to clients.
    fn type_tag(&self) -> &str;

    /// Names of callable methods, as reported by an attribute query.
    fn methods(&self) -> Vec<String>;

    /// Names of readable attributes, as reported by an attribute query.
    fn attributes(&self) -> Vec<String> {
        Vec::new()
    }

    fn call_method(&mut self, name: &str, args: CallArgs) -> Result<Returned, CallError>;

    fn get_attribute(&self, name: &str) -> Result<Value, CallError> {
        Err(CallError::no_attribute(self.type_tag(), name))
    }

    /// Nested object reachable through a dotted method name, e.g. the
    /// `stats` in `stats.reset`.
    fn member_mut(&mut self, _name: &str) -> Option<&mut dyn RemoteObject> {
        None
    }

    /// Called once when a client destructs the object.
    fn teardown(&mut self) {}

    fn as_any(&self) -> &dyn Any;
}

/// Wraps any value so it can be kept server-side as a Secret.
///
/// The wrapped value has no methods and no attributes; it can only be
/// passed back as an argument to other calls.
pub struct SecretValue<T> {
    tag: String,
    value: T,
}

impl<T: Send + 'static> SecretValue<T> {
    pub fn new(tag: impl Into<String>, value: T) -> Self {
        Self {
            tag: tag.into(),
            value,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }
}

impl<T: Send + 'static> RemoteObject for SecretValue<T> {
    fn type_tag(&self) -> &str {
        &self.tag
    }

    fn methods(&self) -> Vec<String> {
        Vec::new()
    }

    fn call_method(&mut self, name: &str, _args: CallArgs) -> Result<Returned, CallError> {
        Err(CallError::no_method(&self.tag, name))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Walks a dotted path through [`RemoteObject::member_mut`].
pub(crate) fn resolve_member<'a>(
    object: &'a mut dyn RemoteObject,
    path: &[&str],
) -> Result<&'a mut dyn RemoteObject, CallError> {
    let mut current = object;
    for segment in path {
        let tag = current.type_tag().to_string();
        current = current
            .member_mut(segment)
            .ok_or_else(|| CallError::no_attribute(&tag, segment))?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stats {
        resets: i64,
    }

    impl RemoteObject for Stats {
        fn type_tag(&self) -> &str {
            "Stats"
        }

        fn methods(&self) -> Vec<String> {
            vec!["reset".to_string()]
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

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Model {
        stats: Stats,
    }

    impl RemoteObject for Model {
        fn type_tag(&self) -> &str {
            "Model"
        }

        fn methods(&self) -> Vec<String> {
            Vec::new()
        }

        fn call_method(&mut self, name: &str, _args: CallArgs) -> Result<Returned, CallError> {
            Err(CallError::no_method("Model", name))
        }

        fn member_mut(&mut self, name: &str) -> Option<&mut dyn RemoteObject> {
            match name {
                "stats" => Some(&mut self.stats),
                _ => None,
            }
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_resolve_member_path() {
        let mut model = Model {
            stats: Stats { resets: 0 },
        };
        let target = resolve_member(&mut model, &["stats"]).unwrap();
        assert_eq!(target.type_tag(), "Stats");
        target.call_method("reset", CallArgs::default()).unwrap();
        assert_eq!(model.stats.resets, 1);
    }

    #[test]
    fn test_resolve_missing_member() {
        let mut model = Model {
            stats: Stats { resets: 0 },
        };
        let err = resolve_member(&mut model, &["weights"]).err().unwrap();
        assert!(matches!(err, CallError::NotFound(_)));
    }

    #[test]
    fn test_secret_value_has_no_surface() {
        let mut secret = SecretValue::new("Dataset", vec![1, 2, 3]);
        assert!(secret.methods().is_empty());
        assert!(secret.attributes().is_empty());
        assert!(secret.call_method("len", CallArgs::default()).is_err());
        assert!(secret.get_attribute("value").is_err());
        assert_eq!(secret.get(), &vec![1, 2, 3]);
    }
}
