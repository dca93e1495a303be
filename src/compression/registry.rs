// SPDX-License-Identifier: MIT
//! Explicit registry mapping compression types to backends
//!
//! The registry is an ordinary value: build it once, share it behind an
//! `Arc`, and swap backends in tests with [`CompressionRegistry::register`].

use std::collections::HashMap;
use std::sync::Arc;

use super::backends::{CompressionBackend, NoCompression, ZlibBackend};
use super::{CompressionError, CompressionType};

/// Maps [`CompressionType`] identifiers to registered backends
#[derive(Debug, Clone)]
pub struct CompressionRegistry {
    backends: HashMap<CompressionType, Arc<dyn CompressionBackend>>,
}

impl CompressionRegistry {
    /// Registry holding only the guaranteed backends (none, zlib)
    pub fn builtin() -> Self {
        let mut backends: HashMap<CompressionType, Arc<dyn CompressionBackend>> = HashMap::new();
        backends.insert(CompressionType::None, Arc::new(NoCompression));
        backends.insert(CompressionType::Zlib, Arc::new(ZlibBackend::default()));
        Self { backends }
    }

    /// Registry holding every backend compiled into this build
    pub fn with_available_backends() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::builtin();

        #[cfg(feature = "brotli")]
        registry.register(super::backends::BrotliBackend::default());

        #[cfg(feature = "lz4")]
        registry.register(super::backends::Lz4Backend);

        #[cfg(feature = "zstd")]
        registry.register(super::backends::ZstdBackend::default());

        registry
    }

    /// Register (or replace) the backend for its own [`CompressionType`]
    pub fn register<B: CompressionBackend + 'static>(&mut self, backend: B) {
        let kind = backend.kind();
        tracing::debug!("Registering {} compression backend", kind);
        self.backends.insert(kind, Arc::new(backend));
    }

    /// Remove an optional backend; the guaranteed backends cannot be removed
    pub fn unregister(&mut self, kind: CompressionType) -> bool {
        if !kind.is_optional() {
            return false;
        }
        self.backends.remove(&kind).is_some()
    }

    /// Capability check for a backend
    #[inline]
    pub fn is_available(&self, kind: CompressionType) -> bool {
        self.backends.contains_key(&kind)
    }

    /// Types currently registered, in id order
    pub fn available(&self) -> Vec<CompressionType> {
        CompressionType::all()
            .iter()
            .copied()
            .filter(|kind| self.is_available(*kind))
            .collect()
    }

    fn backend(&self, kind: CompressionType) -> Result<&dyn CompressionBackend, CompressionError> {
        self.backends
            .get(&kind)
            .map(|backend| backend.as_ref())
            .ok_or(CompressionError::Unavailable { kind })
    }

    /// Resolve the compressor for `kind`
    pub fn compressor(
        &self,
        kind: CompressionType,
    ) -> Result<impl Fn(&[u8]) -> Result<Vec<u8>, CompressionError> + '_, CompressionError> {
        let backend = self.backend(kind)?;
        Ok(move |data: &[u8]| backend.compress(data))
    }

    /// Resolve the decompressor for `kind`
    pub fn decompressor(
        &self,
        kind: CompressionType,
    ) -> Result<impl Fn(&[u8]) -> Result<Vec<u8>, CompressionError> + '_, CompressionError> {
        let backend = self.backend(kind)?;
        Ok(move |data: &[u8]| backend.decompress(data))
    }

    pub fn compress(&self, kind: CompressionType, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        self.backend(kind)?.compress(data)
    }

    pub fn decompress(
        &self,
        kind: CompressionType,
        data: &[u8],
    ) -> Result<Vec<u8>, CompressionError> {
        self.backend(kind)?.decompress(data)
    }
}

impl Default for CompressionRegistry {
    fn default() -> Self {
        Self::with_available_backends()
    }
}
