use std::path::Path;
use std::sync::Arc;

use crate::device::{DeviceClass, DeviceKind};
use crate::error::GateResult;
use crate::tensor::Tensor;

/// A loaded, runnable specialized kernel.
pub trait Kernel: Send + Sync {
    fn run(&self, inputs: &[Tensor]) -> GateResult<Vec<Tensor>>;
}

/// Maps a compiled artifact on disk to a runnable kernel.
///
/// Returning `None` means the artifact could not be loaded for `device`.
pub trait KernelLoader: Send + Sync {
    fn load(&self, artifact: &Path, device: DeviceKind) -> Option<Arc<dyn Kernel>>;
}

/// One loader per runner family, selected through [`DeviceKind::class`].
#[derive(Clone, Default)]
pub struct KernelLoaders {
    host: Option<Arc<dyn KernelLoader>>,
    accelerator: Option<Arc<dyn KernelLoader>>,
}

impl KernelLoaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, loader: Arc<dyn KernelLoader>) -> Self {
        self.host = Some(loader);
        self
    }

    pub fn with_accelerator(mut self, loader: Arc<dyn KernelLoader>) -> Self {
        self.accelerator = Some(loader);
        self
    }

    pub fn loader_for(&self, device: DeviceKind) -> Option<&Arc<dyn KernelLoader>> {
        match device.class()? {
            DeviceClass::Host => self.host.as_ref(),
            DeviceClass::Accelerator => self.accelerator.as_ref(),
        }
    }

    pub fn load(&self, artifact: &Path, device: DeviceKind) -> Option<Arc<dyn Kernel>> {
        let Some(loader) = self.loader_for(device) else {
            tracing::warn!(device = %device, "unsupported device type for kernel loading");
            return None;
        };
        let kernel = loader.load(artifact, device);
        if kernel.is_none() {
            tracing::warn!(
                device = %device,
                artifact = %artifact.display(),
                "kernel loader returned no kernel"
            );
        }
        kernel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Identity;

    impl Kernel for Identity {
        fn run(&self, inputs: &[Tensor]) -> GateResult<Vec<Tensor>> {
            Ok(inputs.to_vec())
        }
    }

    struct Fixed(&'static str);

    impl KernelLoader for Fixed {
        fn load(&self, artifact: &Path, _device: DeviceKind) -> Option<Arc<dyn Kernel>> {
            (artifact == Path::new(self.0)).then(|| Arc::new(Identity) as Arc<dyn Kernel>)
        }
    }

    #[test]
    fn loader_selection_follows_device_class() {
        let loaders = KernelLoaders::new().with_host(Arc::new(Fixed("host.so")));
        assert!(loaders.load(Path::new("host.so"), DeviceKind::Cpu).is_some());
        assert!(loaders.load(Path::new("host.so"), DeviceKind::Cuda).is_none());
        assert!(loaders.load(Path::new("host.so"), DeviceKind::Mps).is_none());

        let loaders = loaders.with_accelerator(Arc::new(Fixed("gpu.so")));
        assert!(loaders.load(Path::new("gpu.so"), DeviceKind::Cuda).is_some());
        assert!(loaders.load(Path::new("host.so"), DeviceKind::Cuda).is_none());
    }
}
