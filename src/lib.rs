// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! An in-memory, versioned, concurrent store of DNS records.
//!
//! The heart of the crate is [`db::Database`], which holds either an
//! authoritative zone or a resolver cache. See the [`db`] module for
//! an overview.

pub mod class;
pub mod db;
pub mod name;
pub mod rr;
pub mod task;
mod util;
