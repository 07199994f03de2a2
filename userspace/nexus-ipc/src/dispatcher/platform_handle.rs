// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Wraps an OS file so it can travel through message pipes like any other handle.

use std::fs::File;
use std::sync::Arc;

use nexus_abi::{Signals, SignalsState};
use parking_lot::Mutex;

use super::{Dispatcher, Lifecycle, Resource, ResourceId};
use crate::awakable::{AddAwakableError, Awakable};
use crate::{Error, Result};

/// Dispatcher owning a wrapped OS file.
pub struct PlatformHandleDispatcher {
    file: Mutex<Option<File>>,
    id: ResourceId,
    lifecycle: Lifecycle,
}

impl PlatformHandleDispatcher {
    pub(crate) fn wrap(file: File) -> Arc<Self> {
        Arc::new(Self { file: Mutex::new(Some(file)), id: ResourceId::next(), lifecycle: Lifecycle::default() })
    }

    /// Takes the file out; the dispatcher is closed afterwards.
    pub fn unwrap_file(&self) -> Result<File> {
        let mut file = self.file.lock();
        self.lifecycle.check_open()?;
        let taken = file.take().ok_or(Error::InvalidArgument)?;
        self.lifecycle.close();
        Ok(taken)
    }
}

impl Resource for PlatformHandleDispatcher {
    fn resource_id(&self) -> ResourceId {
        self.id
    }

    fn close(&self) {
        let mut file = self.file.lock();
        if self.lifecycle.close() {
            drop(file.take());
        }
    }

    fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    fn signals_state(&self) -> SignalsState {
        SignalsState::never()
    }

    fn add_awakable(
        &self,
        _awakable: Arc<dyn Awakable>,
        _signals: Signals,
        _context: u64,
    ) -> core::result::Result<(), AddAwakableError> {
        if self.lifecycle.is_closed() {
            return Err(AddAwakableError::closed());
        }
        Err(AddAwakableError {
            error: Error::FailedPrecondition,
            signals_state: Some(SignalsState::never()),
        })
    }

    fn watch(
        &self,
        _awakable: Arc<dyn Awakable>,
        _signals: Signals,
        _context: u64,
    ) -> Result<SignalsState> {
        self.lifecycle.check_open()?;
        Ok(SignalsState::never())
    }

    fn remove_awakable(&self, _awakable: &Arc<dyn Awakable>, _context: Option<u64>) {}

    fn end_transit(&self) -> Dispatcher {
        let mut file = self.file.lock();
        self.lifecycle.close();
        Dispatcher::PlatformHandle(Arc::new(Self {
            file: Mutex::new(file.take()),
            id: self.id,
            lifecycle: Lifecycle::default(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom, Write};

    #[test]
    fn file_survives_transit() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"descriptor").unwrap();
        let wrapped = PlatformHandleDispatcher::wrap(file);
        let moved = Resource::end_transit(wrapped.as_ref());
        assert_eq!(wrapped.unwrap_file().err(), Some(Error::InvalidArgument));
        let mut file = moved.as_platform_handle().unwrap().unwrap_file().unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut text = String::new();
        file.read_to_string(&mut text).unwrap();
        assert_eq!(text, "descriptor");
    }
}
