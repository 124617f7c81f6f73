//! Data payload model and its translation into the sandbox.
//!
//! A payload is a tree of scalars, sequences, mappings and host-implemented
//! functions. Host functions are exposed to templates as ordinary callables:
//! arguments are converted back into `DataValue`s, the Rust closure runs,
//! and its return value is marshalled into the interpreter again.

use boa_engine::object::builtins::{JsArray, JsFunction};
use boa_engine::object::FunctionObjectBuilder;
use boa_engine::{
    Context, JsNativeError, JsObject, JsResult, JsString, JsValue, NativeFunction,
};
use boa_gc::{Finalize, Trace};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::{Error, Result};

/// Mapping type used for objects and for the top-level template scope
pub type DataMap = BTreeMap<String, DataValue>;

type HostFn = dyn Fn(&[DataValue]) -> std::result::Result<DataValue, String> + Send + Sync;

/// A Rust closure callable from inside a template.
///
/// Returning `Err(message)` throws a JavaScript `Error` with that message;
/// the render then fails with `Error::TemplateError` carrying it.
#[derive(Clone)]
pub struct HostFunction(Arc<HostFn>);

impl HostFunction {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[DataValue]) -> std::result::Result<DataValue, String> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, args: &[DataValue]) -> std::result::Result<DataValue, String> {
        (self.0)(args)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostFunction")
    }
}

impl PartialEq for HostFunction {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A value in the data payload handed to a template
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DataValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<DataValue>),
    Object(DataMap),
    Function(HostFunction),
}

impl DataValue {
    /// Wrap a closure as a template-callable function
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&[DataValue]) -> std::result::Result<DataValue, String> + Send + Sync + 'static,
    {
        DataValue::Function(HostFunction::new(f))
    }

    /// Convert any serializable value (through `serde_json`)
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(DataValue::from)
            .map_err(|e| Error::ConfigError(format!("data payload is not serializable: {}", e)))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DataValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Null)
    }

    /// String form used by host functions that accept "anything printable"
    pub fn to_display_string(&self) -> String {
        match self {
            DataValue::Null => String::new(),
            DataValue::Bool(b) => b.to_string(),
            DataValue::Number(n) => n.to_string(),
            DataValue::String(s) => s.clone(),
            DataValue::Array(items) => items
                .iter()
                .map(DataValue::to_display_string)
                .collect::<Vec<_>>()
                .join(","),
            DataValue::Object(_) => "[object Object]".to_string(),
            DataValue::Function(_) => "[function]".to_string(),
        }
    }
}

impl From<serde_json::Value> for DataValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => DataValue::Null,
            Value::Bool(b) => DataValue::Bool(b),
            Value::Number(n) => DataValue::Number(n.as_f64().unwrap_or_default()),
            Value::String(s) => DataValue::String(s),
            Value::Array(items) => DataValue::Array(items.into_iter().map(DataValue::from).collect()),
            Value::Object(map) => {
                DataValue::Object(map.into_iter().map(|(k, v)| (k, DataValue::from(v))).collect())
            }
        }
    }
}

impl From<&str> for DataValue {
    fn from(s: &str) -> Self {
        DataValue::String(s.to_string())
    }
}

impl From<String> for DataValue {
    fn from(s: String) -> Self {
        DataValue::String(s)
    }
}

impl From<bool> for DataValue {
    fn from(b: bool) -> Self {
        DataValue::Bool(b)
    }
}

impl From<f64> for DataValue {
    fn from(n: f64) -> Self {
        DataValue::Number(n)
    }
}

impl From<i64> for DataValue {
    fn from(n: i64) -> Self {
        DataValue::Number(n as f64)
    }
}

impl From<i32> for DataValue {
    fn from(n: i32) -> Self {
        DataValue::Number(f64::from(n))
    }
}

impl<T: Into<DataValue>> From<Vec<T>> for DataValue {
    fn from(items: Vec<T>) -> Self {
        DataValue::Array(items.into_iter().map(Into::into).collect())
    }
}

impl From<DataMap> for DataValue {
    fn from(map: DataMap) -> Self {
        DataValue::Object(map)
    }
}

impl<K: Into<String>, V: Into<DataValue>> FromIterator<(K, V)> for DataValue {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        DataValue::Object(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Host closure held by a sandbox function object. It owns no boa values,
/// so the collector has nothing to trace through it.
#[derive(Trace, Finalize)]
struct HostCapture(#[unsafe_ignore_trace] HostFunction);

/// Marshal a value into the interpreter
pub(crate) fn to_js(value: &DataValue, ctx: &mut Context) -> JsResult<JsValue> {
    Ok(match value {
        DataValue::Null => JsValue::null(),
        DataValue::Bool(b) => JsValue::from(*b),
        DataValue::Number(n) => JsValue::from(*n),
        DataValue::String(s) => JsValue::from(JsString::from(s.as_str())),
        DataValue::Array(items) => {
            let values = items
                .iter()
                .map(|item| to_js(item, ctx))
                .collect::<JsResult<Vec<_>>>()?;
            JsArray::from_iter(values, ctx).into()
        }
        DataValue::Object(map) => map_to_js(map, ctx)?.into(),
        DataValue::Function(function) => host_function_to_js(function.clone(), ctx).into(),
    })
}

/// Marshal a mapping into a plain sandbox object
pub(crate) fn map_to_js(map: &DataMap, ctx: &mut Context) -> JsResult<JsObject> {
    let object = JsObject::with_object_proto(ctx.intrinsics());
    for (key, value) in map {
        let value = to_js(value, ctx)?;
        object.set(JsString::from(key.as_str()), value, true, ctx)?;
    }
    Ok(object)
}

/// Marshal a sandbox value back into the host
pub(crate) fn from_js(value: &JsValue, ctx: &mut Context) -> JsResult<DataValue> {
    if value.is_null_or_undefined() {
        return Ok(DataValue::Null);
    }
    if let Some(b) = value.as_boolean() {
        return Ok(DataValue::Bool(b));
    }
    if let Some(n) = value.as_number() {
        return Ok(DataValue::Number(n));
    }
    if let Some(s) = value.as_string() {
        return Ok(DataValue::String(s.to_std_string_lossy()));
    }
    // Sandbox functions cannot be called back from the host.
    if value.is_callable() {
        return Ok(DataValue::Null);
    }
    if value.is_object() {
        return value.to_json(ctx).map(DataValue::from);
    }
    Ok(DataValue::String(value.display().to_string()))
}

fn host_function_to_js(function: HostFunction, ctx: &mut Context) -> JsFunction {
    let native = NativeFunction::from_copy_closure_with_captures(
        |_this, args, capture: &HostCapture, ctx| {
            let args = args
                .iter()
                .map(|arg| from_js(arg, ctx))
                .collect::<JsResult<Vec<_>>>()?;
            match capture.0.call(&args) {
                Ok(ret) => to_js(&ret, ctx),
                Err(message) => Err(JsNativeError::error().with_message(message).into()),
            }
        },
        HostCapture(function),
    );
    FunctionObjectBuilder::new(ctx.realm(), native).length(0).build()
}
