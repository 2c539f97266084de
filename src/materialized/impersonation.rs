// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use std::fmt::{self, Debug};

use datafusion_common::Result;

use super::definition::MaterializedViewDefinition;

/// Switches the identity used to resolve a materialized view's query
/// to that of the view's owner.
///
/// Implementations hook into whatever access control the embedding server uses.
/// The returned guard is held for the duration of plan expansion and dropped on every exit path.
pub trait Impersonator: Debug + Send + Sync {
    /// Start acting as `owner` (the owner of the schema containing `definition`).
    fn impersonate(
        &self,
        owner: Option<&str>,
        definition: &MaterializedViewDefinition,
    ) -> Result<ImpersonationGuard>;
}

/// Releases an impersonation when dropped.
pub struct ImpersonationGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ImpersonationGuard {
    /// A guard that runs `release` when dropped.
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A guard with nothing to release.
    pub fn noop() -> Self {
        Self { release: None }
    }
}

impl Debug for ImpersonationGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImpersonationGuard")
            .field("released", &self.release.is_none())
            .finish()
    }
}

impl Drop for ImpersonationGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}
