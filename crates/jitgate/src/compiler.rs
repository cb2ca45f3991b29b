use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::json;

use crate::device::DeviceKind;
use crate::env;
use crate::error::{GateError, GateResult};
use crate::schema::OperatorSchema;
use crate::tensor::Tensor;
use crate::value::Value;

/// Everything a compiler needs to produce a kernel for one call.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub namespace: String,
    pub op_name: String,
    pub overload_name: String,
    pub device_kind: DeviceKind,
    pub trace: bool,
    pub schema: OperatorSchema,
    pub args: Vec<Value>,
    pub kwargs: Vec<(String, Value)>,
}

impl CompileRequest {
    /// Splits the call's arguments at the top of `stack` into positional and
    /// keyword-only values.
    pub fn from_call(
        schema: &OperatorSchema,
        device_kind: DeviceKind,
        trace: bool,
        stack: &[Value],
    ) -> Self {
        let start = stack.len().saturating_sub(schema.arguments.len());
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        for (argument, value) in schema.arguments.iter().zip(&stack[start..]) {
            if argument.kwarg_only {
                kwargs.push((argument.name.clone(), value.clone()));
            } else {
                args.push(value.clone());
            }
        }
        Self {
            namespace: schema.name.namespace.clone(),
            op_name: schema.name.name.clone(),
            overload_name: schema.name.overload.clone(),
            device_kind,
            trace,
            schema: schema.clone(),
            args,
            kwargs,
        }
    }

    /// JSON description handed to out-of-process compilers. Tensors are described
    /// by metadata only.
    pub fn to_json(&self) -> serde_json::Value {
        let kwargs: serde_json::Map<String, serde_json::Value> = self
            .kwargs
            .iter()
            .map(|(name, value)| (name.clone(), describe_value(value)))
            .collect();
        json!({
            "namespace": self.namespace,
            "op_name": self.op_name,
            "overload_name": self.overload_name,
            "device": self.device_kind.as_str(),
            "trace": self.trace,
            "args": self.args.iter().map(describe_value).collect::<Vec<_>>(),
            "kwargs": kwargs,
        })
    }
}

fn describe_tensor(tensor: &Tensor) -> serde_json::Value {
    json!({
        "dtype": tensor.dtype().as_str(),
        "device": tensor.device().to_string(),
        "sizes": tensor.sizes(),
        "strides": tensor.strides(),
    })
}

fn describe_value(value: &Value) -> serde_json::Value {
    match value {
        Value::None | Value::OptionalTensor(None) => serde_json::Value::Null,
        Value::Tensor(tensor) | Value::OptionalTensor(Some(tensor)) => describe_tensor(tensor),
        Value::TensorList(list) => list.iter().map(describe_tensor).collect(),
        Value::OptionalTensorList(list) => list
            .iter()
            .map(|tensor| {
                tensor
                    .as_ref()
                    .map_or(serde_json::Value::Null, describe_tensor)
            })
            .collect(),
        Value::Scalar(scalar) => json!(scalar),
        Value::IntList(values) => json!(values),
        Value::Str(value) => json!(value),
    }
}

/// Produces a kernel artifact for a call.
///
/// `Ok(None)` means the compiler declined or produced nothing; the gate treats it
/// the same as an error and takes the fallback path.
pub trait Compiler: Send + Sync {
    fn compile(&self, request: &CompileRequest) -> GateResult<Option<PathBuf>>;
}

/// Compiles by running an external binary:
/// `<binary> compile --request <request.json> --out-dir <dir>`.
///
/// The artifact path is the last non-empty line the binary prints to stdout.
#[derive(Debug, Clone)]
pub struct ExternalCompiler {
    binary: String,
    out_dir: PathBuf,
}

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(0);

impl ExternalCompiler {
    pub fn new(binary: impl Into<String>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            out_dir: out_dir.into(),
        }
    }

    /// `JITGATE_COMPILER`, writing artifacts under `<JITGATE_CACHE_DIR>/artifacts`.
    pub fn from_env() -> Self {
        Self::new(env::compiler_binary(), env::cache_dir().join("artifacts"))
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }
}

impl Compiler for ExternalCompiler {
    fn compile(&self, request: &CompileRequest) -> GateResult<Option<PathBuf>> {
        std::fs::create_dir_all(&self.out_dir)
            .map_err(|err| GateError::execution(err.to_string()))?;

        let seq = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed);
        let request_path = self.out_dir.join(format!(
            "request_{}.{}_{}_{seq}.json",
            request.op_name,
            request.overload_name,
            std::process::id()
        ));
        let body = serde_json::to_vec_pretty(&request.to_json())
            .map_err(|err| GateError::execution(err.to_string()))?;
        std::fs::write(&request_path, body)
            .map_err(|err| GateError::execution(err.to_string()))?;

        let output = Command::new(&self.binary)
            .arg("compile")
            .arg("--request")
            .arg(&request_path)
            .arg("--out-dir")
            .arg(&self.out_dir)
            .output();
        let _ = std::fs::remove_file(&request_path);
        let output = output.map_err(|err| {
            GateError::execution(format!("failed to run {}: {err}", self.binary))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Err(GateError::execution(format!(
                "{} compile failed (status={}): stdout='{}' stderr='{}'",
                self.binary,
                output.status,
                stdout.trim(),
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .map(PathBuf::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::dtype::ScalarKind;
    use crate::schema::{ArgType, Argument, OperatorName, ReturnType};
    use crate::value::Scalar;

    fn add_schema() -> OperatorSchema {
        OperatorSchema::new(
            OperatorName::new("aten", "add", "Tensor"),
            vec![
                Argument::positional("self", ArgType::Tensor),
                Argument::positional("other", ArgType::Tensor),
                Argument::keyword("alpha", ArgType::Scalar),
            ],
            vec![ReturnType::Tensor],
        )
    }

    fn add_stack() -> Vec<Value> {
        let x = Tensor::zeros(ScalarKind::Float32, Device::cpu(), &[2, 3]).unwrap();
        vec![
            Value::Str("below the call".into()),
            Value::Tensor(x.clone()),
            Value::Tensor(x),
            Value::Scalar(Scalar::Float64(0.5)),
        ]
    }

    #[test]
    fn request_splits_keyword_only_arguments() {
        let request =
            CompileRequest::from_call(&add_schema(), DeviceKind::Cpu, false, &add_stack());
        assert_eq!(request.op_name, "add");
        assert_eq!(request.overload_name, "Tensor");
        assert_eq!(request.args.len(), 2);
        assert_eq!(request.kwargs.len(), 1);
        assert_eq!(request.kwargs[0].0, "alpha");

        let doc = request.to_json();
        assert_eq!(doc["device"], "cpu");
        assert_eq!(doc["args"][0]["sizes"], json!([2, 3]));
        assert_eq!(doc["kwargs"]["alpha"], json!(0.5));
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn external_compiler_reads_last_stdout_line() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "aot-ok", "echo compiling\necho /tmp/kernel.so\necho");
        let compiler = ExternalCompiler::new(script.display().to_string(), dir.path().join("out"));
        let request = CompileRequest::from_call(&add_schema(), DeviceKind::Cpu, false, &add_stack());
        let artifact = compiler.compile(&request).unwrap();
        assert_eq!(artifact, Some(PathBuf::from("/tmp/kernel.so")));
    }

    #[cfg(unix)]
    #[test]
    fn external_compiler_reports_silence_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let request = CompileRequest::from_call(&add_schema(), DeviceKind::Cpu, false, &add_stack());

        let silent = write_script(dir.path(), "aot-silent", "exit 0");
        let compiler = ExternalCompiler::new(silent.display().to_string(), dir.path().join("out"));
        assert_eq!(compiler.compile(&request).unwrap(), None);

        let failing = write_script(dir.path(), "aot-fail", "echo boom >&2\nexit 3");
        let compiler = ExternalCompiler::new(failing.display().to_string(), dir.path().join("out"));
        let err = compiler.compile(&request).unwrap_err();
        assert!(err.to_string().contains("boom"), "unexpected error: {err}");
    }
}
