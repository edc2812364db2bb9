// Copyright (C) 2025 Paul Hampson
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License version 3 as  published by the
// Free Software Foundation.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program.  If not, see <https://www.gnu.org/licenses/>.

use core::future::Future;

/// What the node does when a double reset asks for configuration mode.
pub trait ProvisioningPolicy {
    fn enter_configuration_mode(&mut self, hostname: &str) -> impl Future<Output = ()>;
}

/// Credentials are fixed at build time, so there is nothing to configure.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticCredentials;

impl ProvisioningPolicy for StaticCredentials {
    async fn enter_configuration_mode(&mut self, hostname: &str) {
        info!(
            "{}: configuration mode requested, credentials are static",
            hostname
        );
    }
}
