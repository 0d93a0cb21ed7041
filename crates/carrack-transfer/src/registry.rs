//! Per-device communicator registry

use crate::backend::{
    BackendKind, CollectiveBackend, CommunicatorHandle, LocalCopyBackend, TransferBackend,
};
use carrack_core::{BackendPreference, CarrackError, DeviceId, Result, TransferConfig};
use carrack_effects::DeviceRuntime;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Exactly one communicator per participating device
///
/// The backend is chosen once, at construction, and every transfer through
/// this registry uses it. Dropping the registry tears its communicators down.
#[derive(Debug)]
pub struct CommunicatorRegistry {
    runtime: Arc<DeviceRuntime>,
    backend: Arc<dyn TransferBackend>,
    devices: Vec<DeviceId>,
    communicators: BTreeMap<DeviceId, CommunicatorHandle>,
}

impl CommunicatorRegistry {
    /// Create communicators for `devices` with the configured backend
    pub fn create(
        runtime: &Arc<DeviceRuntime>,
        devices: &[DeviceId],
        config: &TransferConfig,
    ) -> Result<Self> {
        let backend = select_backend(runtime, config.backend)?;
        Self::with_backend(runtime, devices, backend)
    }

    /// Create communicators for `devices` with an explicit backend
    pub fn with_backend(
        runtime: &Arc<DeviceRuntime>,
        devices: &[DeviceId],
        backend: Arc<dyn TransferBackend>,
    ) -> Result<Self> {
        let handles = backend.create_communicators(runtime, devices)?;

        let mut communicators = BTreeMap::new();
        for handle in &handles {
            communicators.insert(handle.device(), handle.clone());
        }
        let complete = handles.len() == devices.len()
            && devices.iter().all(|d| communicators.contains_key(d));
        if !complete {
            backend.teardown(&handles);
            return Err(CarrackError::communication_init(format!(
                "{} backend returned {} communicators for {} devices",
                backend.kind(),
                handles.len(),
                devices.len()
            )));
        }

        tracing::info!(
            backend = %backend.kind(),
            devices = devices.len(),
            "communicator registry created"
        );
        Ok(Self {
            runtime: Arc::clone(runtime),
            backend,
            devices: devices.to_vec(),
            communicators,
        })
    }

    /// Communicator bound to `device`
    pub fn communicator(&self, device: DeviceId) -> Result<&CommunicatorHandle> {
        self.communicators.get(&device).ok_or_else(|| {
            CarrackError::invalid(format!("{device} has no communicator in this registry"))
        })
    }

    /// Participating devices, in rank order
    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    /// Number of communicators
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the registry is empty (never true for a constructed registry)
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Which backend is active
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// The active backend
    pub fn backend(&self) -> &Arc<dyn TransferBackend> {
        &self.backend
    }

    /// Runtime the devices belong to
    pub fn runtime(&self) -> &Arc<DeviceRuntime> {
        &self.runtime
    }
}

impl Drop for CommunicatorRegistry {
    fn drop(&mut self) {
        let handles: Vec<CommunicatorHandle> = self.communicators.values().cloned().collect();
        self.backend.teardown(&handles);
    }
}

fn select_backend(
    runtime: &DeviceRuntime,
    preference: BackendPreference,
) -> Result<Arc<dyn TransferBackend>> {
    let backend: Arc<dyn TransferBackend> = match (preference, runtime.collective()) {
        (BackendPreference::Auto | BackendPreference::Collective, Some(library)) => {
            Arc::new(CollectiveBackend::new(library))
        }
        (BackendPreference::Collective, None) => {
            return Err(CarrackError::communication_init(
                "collective backend requested but no collective library is available",
            ));
        }
        (BackendPreference::Auto, None) => {
            tracing::info!("collective library unavailable, falling back to local copies");
            Arc::new(LocalCopyBackend)
        }
        (BackendPreference::Local, _) => Arc::new(LocalCopyBackend),
    };
    Ok(backend)
}
