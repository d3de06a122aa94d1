//! JS Engine implemented by [Duktape](https://crates.io/crates/ducc).

use crate::{
    error::{Error, Result},
    js_engine::{split_path, JsEngine},
};
use ducc::{FromValue, ToValue};

/// Duktape engine wrapper implementing [`JsEngine`].
pub struct Engine(ducc::Ducc);

impl JsEngine for Engine {
    type JsValue<'a> = ducc::Value<'a>;

    fn new() -> Result<Self> {
        Ok(Self(ducc::Ducc::new()))
    }

    fn eval<'a>(&'a self, code: &str, origin: &str) -> Result<Self::JsValue<'a>> {
        self.0
            .exec(code, Some(origin), ducc::ExecSettings::default())
            .map_err(|e| Error::JsExecError(format!("{origin}: {e}")))
    }

    fn call_function<'a>(
        &'a self,
        path: &str,
        args: impl Iterator<Item = Self::JsValue<'a>>,
    ) -> Result<Self::JsValue<'a>> {
        let (owners, name) = split_path(path)?;
        let mut owner = self.0.globals();
        for segment in owners {
            owner = owner.get::<String, ducc::Object>(segment.to_owned())?;
        }
        let function = owner.get::<String, ducc::Function>(name.to_owned())?;
        let args: ducc::Values = args.collect();
        Ok(function.call(args)?)
    }

    fn create_bool_value(&self, input: bool) -> Result<Self::JsValue<'_>> {
        Ok(input.to_value(&self.0)?)
    }

    fn create_int_value(&self, input: i32) -> Result<Self::JsValue<'_>> {
        Ok(input.to_value(&self.0)?)
    }

    fn create_float_value(&self, input: f64) -> Result<Self::JsValue<'_>> {
        Ok(input.to_value(&self.0)?)
    }

    fn create_string_value(&self, input: String) -> Result<Self::JsValue<'_>> {
        Ok(input.to_value(&self.0)?)
    }

    fn create_object_value<'a>(
        &'a self,
        input: impl Iterator<Item = (String, Self::JsValue<'a>)>,
    ) -> Result<Self::JsValue<'a>> {
        let obj = self.0.create_object();
        for (k, v) in input {
            obj.set(k, v)?;
        }
        Ok(ducc::Value::Object(obj))
    }

    // Duktape has no promise job queue.
    fn run_pending_jobs(&self) -> Result<usize> {
        Ok(0)
    }

    fn value_to_string(&self, value: Self::JsValue<'_>) -> Result<String> {
        Ok(String::from_value(value, &self.0)?)
    }
}

impl From<ducc::Error> for Error {
    fn from(e: ducc::Error) -> Self {
        use ducc::ErrorKind;

        match e.kind {
            ErrorKind::ToJsConversionError { .. } | ErrorKind::FromJsConversionError { .. } => {
                Self::JsValueError(format!("{e}"))
            }
            _ => Self::JsExecError(format!("{e}")),
        }
    }
}
