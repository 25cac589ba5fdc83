// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bluetooth Message Access Profile server engine.
//!
//! Serves MAP clients over OBEX (the MAS side) and pushes event reports to
//! their notification servers (the MNS client side). The OBEX transport and
//! SDP are supplied by the host through the traits in [`mns`] and the
//! request model in [`obex`].

pub mod bmsg;
pub mod config;
pub mod error;
pub mod event;
pub mod folder;
pub mod instance;
pub mod mns;
pub mod obex;
pub mod params;
pub mod resource;
pub mod server;
pub mod service;
pub mod store;

pub use error::{MapError, MapResult};
