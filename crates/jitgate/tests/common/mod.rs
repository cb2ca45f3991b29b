#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use jitgate::{
    ArgType, Argument, CacheStore, CompileRequest, Compiler, Device, DeviceKind, DispatchGate,
    DispatchKey, DispatchKeySet, EmptyCacheStore, FallbackHandler, GateConfig, GateError,
    GateResult, Kernel, KernelLoader, KernelLoaders, OperatorName, OperatorSchema, ReturnType,
    Scalar, ScalarKind, Tensor, Value,
};

/// Compiler that hands out `<name>-<n>.so` paths and counts invocations.
pub struct CountingCompiler {
    calls: AtomicUsize,
    mode: CompileMode,
    requests: Mutex<Vec<CompileRequest>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum CompileMode {
    Artifact,
    Nothing,
    Error,
}

impl CountingCompiler {
    pub fn new(mode: CompileMode) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            mode,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CompileRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

impl Compiler for CountingCompiler {
    fn compile(&self, request: &CompileRequest) -> GateResult<Option<PathBuf>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        match self.mode {
            CompileMode::Artifact => Ok(Some(PathBuf::from(format!(
                "/kernels/{}-{n}.so",
                request.op_name
            )))),
            CompileMode::Nothing => Ok(None),
            CompileMode::Error => Err(GateError::execution("compiler crashed")),
        }
    }
}

/// Kernel that returns a single `UInt8` tensor spelling its artifact file name.
pub struct LabelKernel {
    label: String,
    runs: Arc<AtomicUsize>,
    inputs: Mutex<Vec<usize>>,
}

impl LabelKernel {
    pub fn input_counts(&self) -> Vec<usize> {
        self.inputs.lock().unwrap().clone()
    }
}

impl Kernel for LabelKernel {
    fn run(&self, inputs: &[Tensor]) -> GateResult<Vec<Tensor>> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(inputs.len());
        Ok(vec![label_tensor(&self.label)])
    }
}

/// Loader refusing any artifact whose name contains `missing`.
#[derive(Default)]
pub struct LabelLoader {
    loads: AtomicUsize,
    runs: Arc<AtomicUsize>,
    kernels: Mutex<Vec<Arc<LabelKernel>>>,
}

impl LabelLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn kernels(&self) -> Vec<Arc<LabelKernel>> {
        self.kernels.lock().unwrap().clone()
    }
}

impl KernelLoader for LabelLoader {
    fn load(&self, artifact: &Path, _device: DeviceKind) -> Option<Arc<dyn Kernel>> {
        let label = artifact.file_name()?.to_string_lossy().into_owned();
        if label.contains("missing") {
            return None;
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        let kernel = Arc::new(LabelKernel {
            label,
            runs: Arc::clone(&self.runs),
            inputs: Mutex::new(Vec::new()),
        });
        self.kernels.lock().unwrap().push(Arc::clone(&kernel));
        Some(kernel)
    }
}

/// Generic implementation that replaces the arguments with a `fallback` label.
#[derive(Default)]
pub struct RecordingFallback {
    calls: AtomicUsize,
}

impl RecordingFallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FallbackHandler for RecordingFallback {
    fn call(
        &self,
        schema: &OperatorSchema,
        _keyset: DispatchKeySet,
        stack: &mut Vec<Value>,
    ) -> GateResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let keep = stack.len() - schema.arguments.len();
        stack.truncate(keep);
        stack.push(Value::Tensor(label_tensor("fallback")));
        Ok(())
    }
}

pub fn label_tensor(label: &str) -> Tensor {
    let bytes = label.as_bytes().to_vec();
    Tensor::from_parts(
        ScalarKind::UInt8,
        Device::cpu(),
        vec![bytes.len() as i64],
        vec![1],
        bytes,
    )
    .unwrap()
}

/// Label of the tensor on top of the stack.
pub fn top_label(stack: &[Value]) -> String {
    let tensor = stack
        .last()
        .and_then(Value::as_tensor)
        .expect("stack top should be a tensor");
    String::from_utf8(tensor.bytes().to_vec()).unwrap()
}

pub fn cpu_tensor(sizes: &[i64]) -> Tensor {
    Tensor::zeros(ScalarKind::Float32, Device::cpu(), sizes).unwrap()
}

pub fn cpu_keys() -> DispatchKeySet {
    DispatchKeySet::from(DispatchKey::Cpu)
}

/// `aten::add.Tensor(Tensor self, Tensor other, *, Scalar alpha) -> Tensor`
pub fn add_schema() -> OperatorSchema {
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

pub fn add_call(sizes: &[i64], alpha: Scalar) -> Vec<Value> {
    vec![
        Value::Tensor(cpu_tensor(sizes)),
        Value::Tensor(cpu_tensor(sizes)),
        Value::Scalar(alpha),
    ]
}

pub struct Harness {
    pub gate: DispatchGate,
    pub compiler: Arc<CountingCompiler>,
    pub loader: Arc<LabelLoader>,
    pub fallback: Arc<RecordingFallback>,
}

impl Harness {
    pub fn new(mode: CompileMode, with_fallback: bool) -> Self {
        Self::with_store(mode, with_fallback, DispatchKey::Cpu, &EmptyCacheStore)
    }

    pub fn with_store(
        mode: CompileMode,
        with_fallback: bool,
        dispatch_key: DispatchKey,
        store: &dyn CacheStore,
    ) -> Self {
        Self::try_with_store(mode, with_fallback, dispatch_key, store)
            .expect("gate construction should succeed")
    }

    pub fn try_with_store(
        mode: CompileMode,
        with_fallback: bool,
        dispatch_key: DispatchKey,
        store: &dyn CacheStore,
    ) -> GateResult<Self> {
        let compiler = CountingCompiler::new(mode);
        let loader = LabelLoader::new();
        let fallback = RecordingFallback::new();
        let loaders = KernelLoaders::new().with_host(loader.clone());
        let gate = DispatchGate::new(
            GateConfig::new("aten", "add", "Tensor", dispatch_key),
            compiler.clone(),
            loaders,
            with_fallback.then(|| fallback.clone() as Arc<dyn FallbackHandler>),
            store,
        )?;
        Ok(Self {
            gate,
            compiler,
            loader,
            fallback,
        })
    }
}
