use std::{
    cell::{Cell, RefCell},
    sync::{
        Arc, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
};

use rustc_hash::FxHashMap as HashMap;
use thiserror::Error;

use super::{
    Callback, Driver, DriverError, ErrorCode, GpuId, Kernel, LaunchConfig, Stream, StreamId,
};
use crate::platform;

thread_local! {
    /// The device whose kernel the current thread is running as a lane of.
    static KERNEL: Cell<Option<GpuId>> = const { Cell::new(None) };

    /// The device each emulator issues commands to from the current host thread.
    static CURRENT: RefCell<HashMap<EmulatorId, GpuId>> = RefCell::new(HashMap::default());
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
struct EmulatorId(uid::Id<EmulatorId>);

#[derive(Debug, Clone)]
pub struct EmulatorBuilder {
    pub devices: usize,
    pub dynamic_parallelism: bool,
    pub max_shared_memory: usize,
    pub max_lanes: u32,
}

impl Default for EmulatorBuilder {
    fn default() -> Self {
        Self {
            devices: 1,
            dynamic_parallelism: false,
            max_shared_memory: 48 << 10,
            max_lanes: 1024,
        }
    }
}

#[derive(Debug, Error)]
pub enum EmulatorBuildError {
    #[error("an emulator needs at least one device")]
    NoDevice,
    #[error("failed to spawn stream worker")]
    Spawn(#[from] std::io::Error),
}

impl EmulatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(self) -> Result<Emulator, EmulatorBuildError> {
        if self.devices == 0 {
            return Err(EmulatorBuildError::NoDevice);
        }

        let mut streams = HashMap::default();
        for id in 0..self.devices {
            let gpu = GpuId::new(id as i32);
            let sender = spawn_stream(gpu, Stream::Default)?;
            streams.insert((gpu, Stream::Default), sender);
        }
        let launches = (0..self.devices).map(|_| AtomicUsize::new(0)).collect();

        let inner = Inner {
            id: EmulatorId::default(),
            limits: self,
            streams: RwLock::new(streams),
            launches,
        };
        Ok(Emulator(Arc::new(inner)))
    }

    pub fn devices(mut self, devices: usize) -> Self {
        self.devices = devices;
        self
    }

    pub fn dynamic_parallelism(mut self, enabled: bool) -> Self {
        self.dynamic_parallelism = enabled;
        self
    }

    pub fn max_shared_memory(mut self, bytes: usize) -> Self {
        self.max_shared_memory = bytes;
        self
    }

    pub fn max_lanes(mut self, lanes: u32) -> Self {
        self.max_lanes = lanes;
        self
    }
}

enum Command {
    Launch { kernel: Kernel, config: LaunchConfig },
    Callback(Callback),
}

struct Inner {
    id: EmulatorId,
    limits: EmulatorBuilder,
    streams: RwLock<HashMap<(GpuId, Stream), flume::Sender<Command>>>,
    launches: Box<[AtomicUsize]>,
}

/// A [`Driver`] running kernels on host threads.
///
/// Like a device runtime, the current device is per host thread: every thread starts on device 0,
/// and switching on one thread leaves the others alone.
///
/// Every stream is served by a worker thread of its own, executing commands in issue order.
/// A kernel runs its groups in parallel, and the lanes of each group concurrently so they can
/// meet at [`sync_lanes`](super::sync_lanes). A panicking lane fails the kernel and, from then on,
/// its stream: later kernels are skipped and callbacks observe [`ErrorCode::LaunchFailure`].
#[derive(Clone)]
pub struct Emulator(Arc<Inner>);

impl std::fmt::Debug for Emulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emulator")
            .field("limits", &self.0.limits)
            .finish_non_exhaustive()
    }
}

impl Emulator {
    /// Number of kernels issued to `gpu` so far.
    pub fn launches(&self, gpu: GpuId) -> usize {
        usize::try_from(gpu.native_handle())
            .ok()
            .and_then(|id| self.0.launches.get(id))
            .map_or(0, |count| count.load(Ordering::Acquire))
    }

    fn check(&self, gpu: GpuId, context: &'static str) -> Result<usize, DriverError> {
        match usize::try_from(gpu.native_handle()) {
            Ok(id) if id < self.0.limits.devices => Ok(id),
            _ => Err(DriverError::new(ErrorCode::InvalidDevice, context)),
        }
    }

    fn send(
        &self,
        stream: Stream,
        command: Command,
        context: &'static str,
    ) -> Result<GpuId, DriverError> {
        let gpu = self.current_device()?;
        let streams = self.0.streams.read().expect("failed to lock");
        let Some(sender) = streams.get(&(gpu, stream)) else {
            return Err(DriverError::new(ErrorCode::InvalidHandle, context));
        };
        sender
            .send(command)
            .map_err(|_| DriverError::new(ErrorCode::InvalidHandle, context))?;
        Ok(gpu)
    }
}

impl Driver for Emulator {
    fn device_count(&self) -> Result<usize, DriverError> {
        Ok(self.0.limits.devices)
    }

    fn current_device(&self) -> Result<GpuId, DriverError> {
        match KERNEL.get() {
            Some(gpu) => Ok(gpu),
            None => Ok(CURRENT.with_borrow(|current| {
                current.get(&self.0.id).copied().unwrap_or(GpuId::new(0))
            })),
        }
    }

    fn set_device(&self, gpu: GpuId) -> Result<(), DriverError> {
        self.check(gpu, "set device")?;
        CURRENT.with_borrow_mut(|current| current.insert(self.0.id, gpu));
        Ok(())
    }

    fn create_stream(&self) -> Result<Stream, DriverError> {
        let gpu = self.current_device()?;
        let stream = Stream::Created(StreamId::default());
        let sender = spawn_stream(gpu, stream)
            .map_err(|_| DriverError::new(ErrorCode::MemoryAllocation, "create stream"))?;
        let mut streams = self.0.streams.write().expect("failed to lock");
        streams.insert((gpu, stream), sender);
        Ok(stream)
    }

    fn launch(&self, kernel: Kernel, config: LaunchConfig) -> Result<(), DriverError> {
        let [groups, lanes] = config.shape;
        if groups == 0 || lanes == 0 || lanes > self.0.limits.max_lanes {
            return Err(DriverError::new(ErrorCode::InvalidConfiguration, "launch"));
        }
        if config.shared_memory > self.0.limits.max_shared_memory {
            return Err(DriverError::new(ErrorCode::LaunchOutOfResources, "launch"));
        }
        if self.in_kernel() && !self.supports_device_launch() {
            return Err(DriverError::new(ErrorCode::NotSupported, "launch"));
        }

        log::trace!("launch {} with shape {:?}", kernel.entry(), config.shape);
        let gpu = self.send(config.stream, Command::Launch { kernel, config }, "launch")?;
        let id = self.check(gpu, "launch")?;
        self.0.launches[id].fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn add_callback(&self, stream: Stream, callback: Callback) -> Result<(), DriverError> {
        self.send(stream, Command::Callback(callback), "add callback")
            .map(|_| ())
    }

    fn in_kernel(&self) -> bool {
        KERNEL.get().is_some()
    }

    fn supports_device_launch(&self) -> bool {
        self.0.limits.dynamic_parallelism
    }
}

fn spawn_stream(gpu: GpuId, stream: Stream) -> std::io::Result<flume::Sender<Command>> {
    let (sender, receiver) = flume::unbounded();
    let name = match stream {
        Stream::Default => format!("{gpu} default stream"),
        Stream::Created(id) => format!("{gpu} stream {id}"),
    };
    std::thread::Builder::new()
        .name(name)
        .spawn(move || serve(gpu, receiver))?;
    Ok(sender)
}

fn serve(gpu: GpuId, receiver: flume::Receiver<Command>) {
    let mut status = Ok(());
    while let Ok(command) = receiver.recv() {
        match command {
            Command::Launch { kernel, .. } if status.is_err() => {
                log::trace!("skip {} on failed stream", kernel.entry());
            }
            Command::Launch { kernel, config } => {
                log::trace!("run {} on {gpu}", kernel.entry());
                status = run(gpu, &kernel, config.shape);
            }
            Command::Callback(callback) => callback(status),
        }
    }
}

fn run(gpu: GpuId, kernel: &Kernel, [groups, lanes]: [u32; 2]) -> Result<(), DriverError> {
    let result = platform::run_teams(groups as usize, lanes as usize, |_| (), |_, group, lane| {
        KERNEL.set(Some(gpu));
        kernel.call([group as u32, lane as u32]);
        KERNEL.set(None);
    });
    result.map_err(|err| {
        log::error!("kernel {} failed on {gpu}: {err}", kernel.entry());
        DriverError::new(ErrorCode::LaunchFailure, "kernel execution")
    })
}
