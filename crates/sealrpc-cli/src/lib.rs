// Copyright 2025 SealRPC Authors
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

//! # SealRPC CLI
//!
//! Support code for the `sealrpc` binary:
//!
//! - [`demo`]: the module `sealrpc serve` exposes
//! - [`json`]: conversions between command-line JSON and protocol values
//!
//! ## Key Commands
//!
//! - `sealrpc keygen`: write a key pair certificate
//! - `sealrpc serve`: run a server with the demo module
//! - `sealrpc call`: call a function and print the result as JSON

pub mod demo;
pub mod json;
