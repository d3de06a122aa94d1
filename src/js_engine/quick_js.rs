//! JS Engine implemented by [QuickJs](https://crates.io/crates/rquickjs).

use rquickjs::IteratorJs;

use crate::{
    error::{Error, Result},
    js_engine::{split_path, JsEngine},
};

#[derive(Debug)]
pub(crate) struct Value(rquickjs::Persistent<rquickjs::Value<'static>>);

/// QuickJS runtime plus the context scripts run in. The runtime is kept so
/// its promise job queue can be drained.
pub struct Engine {
    context: rquickjs::Context,
    runtime: rquickjs::Runtime,
}

/// Upper bound on jobs run by one [`JsEngine::run_pending_jobs`] call, so a
/// script that keeps re-queueing itself cannot stall the event loop.
const MAX_JOBS_PER_DRAIN: usize = 10_000;

fn save<'js>(ctx: &rquickjs::Ctx<'js>, value: rquickjs::Value<'js>) -> Value {
    Value(rquickjs::Persistent::<rquickjs::Value>::save(ctx, value))
}

impl JsEngine for Engine {
    type JsValue<'a> = Value;

    fn new() -> Result<Self> {
        let runtime = rquickjs::Runtime::new()?;
        let context = rquickjs::Context::full(&runtime)?;
        Ok(Self { context, runtime })
    }

    fn eval<'a>(&'a self, code: &str, origin: &str) -> Result<Self::JsValue<'a>> {
        self.context.with(|ctx| {
            let value: rquickjs::Value = ctx
                .eval(code)
                .map_err(|e| Error::JsExecError(format!("{origin}: {e}")))?;
            Ok(save(&ctx, value))
        })
    }

    fn call_function<'a>(
        &'a self,
        path: &str,
        args: impl Iterator<Item = Self::JsValue<'a>>,
    ) -> Result<Self::JsValue<'a>> {
        let (owners, name) = split_path(path)?;
        let args: Vec<_> = args.collect(); // needed to avoid re-entrant borrow of `ctx`
        self.context.with(|ctx| {
            let mut owner: rquickjs::Object<'_> = ctx.globals();
            for segment in owners {
                owner = owner.get(segment)?;
            }
            let func: rquickjs::Function<'_> = owner.get(name)?;
            let mut qjs_args = rquickjs::function::Args::new_unsized(ctx.clone());
            for arg in args {
                qjs_args.push_arg(arg.0.restore(&ctx)?)?;
            }

            let result: rquickjs::Value = func.call_arg(qjs_args)?;
            Ok(save(&ctx, result))
        })
    }

    fn create_bool_value(&self, input: bool) -> Result<Self::JsValue<'_>> {
        self.context.with(|ctx| Ok(save(&ctx, rquickjs::Value::new_bool(ctx.clone(), input))))
    }

    fn create_int_value(&self, input: i32) -> Result<Self::JsValue<'_>> {
        self.context.with(|ctx| Ok(save(&ctx, rquickjs::Value::new_int(ctx.clone(), input))))
    }

    fn create_float_value(&self, input: f64) -> Result<Self::JsValue<'_>> {
        self.context.with(|ctx| Ok(save(&ctx, rquickjs::Value::new_float(ctx.clone(), input))))
    }

    fn create_string_value(&self, input: String) -> Result<Self::JsValue<'_>> {
        self.context.with(|ctx| {
            let value = rquickjs::String::from_str(ctx.clone(), &input)?.into();
            Ok(save(&ctx, value))
        })
    }

    fn create_object_value<'a>(
        &'a self,
        input: impl Iterator<Item = (String, Self::JsValue<'a>)>,
    ) -> Result<Self::JsValue<'a>> {
        let input: Vec<_> = input.collect(); // needed to avoid re-entrant borrow of `ctx`
        self.context.with(|ctx| {
            let mut entries = Vec::with_capacity(input.len());
            for (key, val) in input {
                entries.push((key, val.0.restore(&ctx)?));
            }
            let obj: rquickjs::Object = entries.into_iter().collect_js(&ctx)?;
            Ok(save(&ctx, obj.into()))
        })
    }

    fn run_pending_jobs(&self) -> Result<usize> {
        let mut ran = 0;
        while ran < MAX_JOBS_PER_DRAIN {
            match self.runtime.execute_pending_job() {
                Ok(true) => ran += 1,
                Ok(false) => break,
                Err(_) => {
                    return Err(Error::JsExecError(
                        "pending promise job raised an exception".to_owned(),
                    ))
                }
            }
        }
        Ok(ran)
    }

    fn value_to_string(&self, value: Self::JsValue<'_>) -> Result<String> {
        self.context.with(|ctx| {
            let v: rquickjs::Value = value.0.restore(&ctx)?;
            Ok(v.into_string()
                .ok_or_else(|| Error::JsValueError("failed to convert value to string".to_owned()))?
                .to_string()?)
        })
    }
}

impl From<rquickjs::Error> for Error {
    fn from(e: rquickjs::Error) -> Self {
        match e {
            rquickjs::Error::Allocation => Error::JsInitError(e.to_string()),
            rquickjs::Error::InvalidString(_)
            | rquickjs::Error::InvalidCStr(_)
            | rquickjs::Error::Utf8(_)
            | rquickjs::Error::FromJs { .. }
            | rquickjs::Error::IntoJs { .. }
            | rquickjs::Error::AsSlice(_) => Error::JsValueError(e.to_string()),
            _ => Error::JsExecError(e.to_string()),
        }
    }
}
