//! Server-side service table and request dispatch

use crate::protocol::{Request, Response, RpcValue, Value, ValueType};
use dashmap::DashMap;
use minirpc_core::{Error, Result};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// One invocable method
pub trait MethodHandler: Send + Sync {
    fn invoke(&self, args: Vec<Value>) -> Result<Value>;
}

impl<F> MethodHandler for F
where
    F: Fn(Vec<Value>) -> Result<Value> + Send + Sync,
{
    fn invoke(&self, args: Vec<Value>) -> Result<Value> {
        self(args)
    }
}

fn signature(types: &[ValueType]) -> String {
    let names: Vec<String> = types.iter().map(ValueType::to_string).collect();
    names.join(", ")
}

fn take_arg<T: RpcValue>(args: &mut std::vec::IntoIter<Value>) -> Result<T> {
    let value = args
        .next()
        .ok_or_else(|| Error::InvalidArguments("too few arguments".to_string()))?;
    T::from_value(value)
}

/// A service implementation: methods keyed by name and parameter types
///
/// Methods may be overloaded on their parameter types.
pub struct RpcService {
    interface: String,
    methods: HashMap<(String, Vec<ValueType>), Arc<dyn MethodHandler>>,
}

impl RpcService {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            methods: HashMap::new(),
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Add an untyped method
    pub fn method(
        mut self,
        name: impl Into<String>,
        params: Vec<ValueType>,
        handler: impl MethodHandler + 'static,
    ) -> Self {
        self.methods.insert((name.into(), params), Arc::new(handler));
        self
    }

    /// Add a method without parameters
    pub fn nullary<R, F>(self, name: &str, f: F) -> Self
    where
        R: RpcValue,
        F: Fn() -> Result<R> + Send + Sync + 'static,
    {
        self.method(name, vec![], move |_args: Vec<Value>| f().map(R::into_value))
    }

    /// Add a one-parameter method
    pub fn unary<A, R, F>(self, name: &str, f: F) -> Self
    where
        A: RpcValue,
        R: RpcValue,
        F: Fn(A) -> Result<R> + Send + Sync + 'static,
    {
        self.method(name, vec![A::VALUE_TYPE], move |args: Vec<Value>| {
            let mut args = args.into_iter();
            let a = take_arg::<A>(&mut args)?;
            f(a).map(R::into_value)
        })
    }

    /// Add a two-parameter method
    pub fn binary<A, B, R, F>(self, name: &str, f: F) -> Self
    where
        A: RpcValue,
        B: RpcValue,
        R: RpcValue,
        F: Fn(A, B) -> Result<R> + Send + Sync + 'static,
    {
        self.method(name, vec![A::VALUE_TYPE, B::VALUE_TYPE], move |args: Vec<Value>| {
            let mut args = args.into_iter();
            let a = take_arg::<A>(&mut args)?;
            let b = take_arg::<B>(&mut args)?;
            f(a, b).map(R::into_value)
        })
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.keys().any(|(method, _)| method == name)
    }

    /// Invoke `method` with arguments of the declared `types`
    pub fn invoke(&self, method: &str, types: &[ValueType], args: Vec<Value>) -> Result<Value> {
        if types.len() != args.len() {
            return Err(Error::InvalidArguments(format!(
                "{} parameter types declared for {} arguments",
                types.len(),
                args.len()
            )));
        }
        if let Some((i, value)) = args
            .iter()
            .enumerate()
            .find(|(i, value)| value.value_type() != types[*i])
        {
            return Err(Error::InvalidArguments(format!(
                "argument {} is {}, declared {}",
                i,
                value.value_type(),
                types[i]
            )));
        }

        let handler = self
            .methods
            .get(&(method.to_string(), types.to_vec()))
            .ok_or_else(|| {
                Error::MethodNotFound(format!("{}.{}({})", self.interface, method, signature(types)))
            })?;
        handler.invoke(args)
    }
}

/// Service implementations by service key
///
/// The first registration of a key wins.
#[derive(Default)]
pub struct ServiceTable {
    services: DashMap<String, Arc<RpcService>>,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `service` under `key`; returns false if the key was taken
    pub fn insert(&self, key: &str, service: RpcService) -> bool {
        let mut inserted = false;
        self.services.entry(key.to_string()).or_insert_with(|| {
            inserted = true;
            Arc::new(service)
        });
        if inserted {
            debug!("Registered service {}", key);
        } else {
            warn!("Service {} already registered, keeping the first", key);
        }
        inserted
    }

    pub fn get(&self, key: &str) -> Option<Arc<RpcService>> {
        self.services.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.services.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.services.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "method panicked".to_string()
    }
}

/// Turns requests into responses
///
/// Every failure, including a panicking method, becomes a FAIL response.
#[derive(Clone)]
pub struct RequestDispatcher {
    services: Arc<ServiceTable>,
}

impl RequestDispatcher {
    pub fn new(services: Arc<ServiceTable>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &Arc<ServiceTable> {
        &self.services
    }

    pub fn dispatch(&self, request: Request) -> Response {
        let Request {
            correlation_id,
            service_name,
            method_name,
            param_types,
            parameters,
        } = request;

        let result = match self.services.get(&service_name) {
            None => Err(Error::ServiceNotFound(service_name.clone())),
            Some(service) => catch_unwind(AssertUnwindSafe(|| {
                service.invoke(&method_name, &param_types, parameters)
            }))
            .unwrap_or_else(|panic| Err(Error::Invocation(panic_message(panic)))),
        };

        match result {
            Ok(data) => Response::success(correlation_id, data),
            Err(e) => {
                warn!(
                    "Request {} for {}.{} failed: {}",
                    correlation_id, service_name, method_name, e
                );
                Response::fail(correlation_id, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StatusCode;

    fn calculator() -> RpcService {
        RpcService::new("Calculator")
            .binary("add", |a: i64, b: i64| Ok(a + b))
            .unary("add", |a: f64| Ok(a + 1.0))
            .unary("divide_by_zero", |a: i64| {
                a.checked_div(0)
                    .ok_or_else(|| Error::Invocation("division by zero".to_string()))
            })
            .nullary("explode", || -> Result<()> { panic!("kaboom") })
            .method("sum", vec![ValueType::List], |args: Vec<Value>| match &args[0] {
                Value::List(items) => Ok(Value::I64(
                    items
                        .iter()
                        .map(|v| if let Value::I64(n) = v { *n } else { 0 })
                        .sum(),
                )),
                _ => Err(Error::InvalidArguments("expected a list".to_string())),
            })
    }

    fn dispatcher() -> RequestDispatcher {
        let table = Arc::new(ServiceTable::new());
        table.insert("Calculator:g1:v1", calculator());
        RequestDispatcher::new(table)
    }

    fn call(method: &str, args: Vec<Value>) -> Response {
        dispatcher().dispatch(Request::new("r1", "Calculator:g1:v1", method, args))
    }

    #[test]
    fn test_success_carries_value_and_id() {
        let response = call("add", vec![Value::I64(2), Value::I64(3)]);
        assert_eq!(response.status, StatusCode::Success);
        assert_eq!(response.correlation_id, "r1");
        assert_eq!(response.data, Some(Value::I64(5)));
    }

    #[test]
    fn test_overloads_resolve_by_parameter_types() {
        assert_eq!(call("add", vec![Value::F64(1.5)]).data, Some(Value::F64(2.5)));
        assert_eq!(
            call("sum", vec![Value::List(vec![Value::I64(1), Value::I64(2)])]).data,
            Some(Value::I64(3))
        );
    }

    #[test]
    fn test_missing_method_is_fail() {
        let response = call("add", vec![Value::String("x".into())]);
        assert_eq!(response.status, StatusCode::Fail);
        assert!(response.message.contains("Calculator.add(String)"), "{}", response.message);

        let response = call("multiply", vec![]);
        assert!(response.message.starts_with("Method not found"));
    }

    #[test]
    fn test_unknown_service_is_fail() {
        let response = dispatcher().dispatch(Request::new("r9", "Nope:g1:v1", "x", vec![]));
        assert_eq!(response.status, StatusCode::Fail);
        assert_eq!(response.correlation_id, "r9");
        assert!(response.message.contains("Nope:g1:v1"));
    }

    #[test]
    fn test_method_error_is_fail() {
        let response = call("divide_by_zero", vec![Value::I64(1)]);
        assert_eq!(response.status, StatusCode::Fail);
        assert!(response.message.contains("division by zero"));
    }

    #[test]
    fn test_panic_is_contained() {
        let response = call("explode", vec![]);
        assert_eq!(response.status, StatusCode::Fail);
        assert!(response.message.contains("kaboom"));
    }

    #[test]
    fn test_declared_types_must_match_values() {
        let mut request = Request::new("r1", "Calculator:g1:v1", "add", vec![Value::I64(1), Value::I64(2)]);
        request.param_types = vec![ValueType::I64, ValueType::String];
        let response = dispatcher().dispatch(request);
        assert_eq!(response.status, StatusCode::Fail);
        assert!(response.message.starts_with("Invalid arguments"));
    }

    #[test]
    fn test_first_registration_wins() {
        let table = ServiceTable::new();
        assert!(table.insert("Calculator:g1:v1", calculator()));
        assert!(!table.insert("Calculator:g1:v1", RpcService::new("Other")));
        assert_eq!(table.get("Calculator:g1:v1").unwrap().interface(), "Calculator");
        assert!(table.get("Calculator:g1:v1").unwrap().has_method("sum"));
        assert_eq!(table.len(), 1);
    }
}
