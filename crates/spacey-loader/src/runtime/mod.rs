// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Host runtime: fetch transports and the async fetch loop

mod event_loop;
mod transport;

pub use event_loop::{AsyncFileTransport, FetchLoop, fetch_loop};
pub use transport::{
    Evaluator, Fetch, FetchOutcome, FetchRequest, FetchTicket, FileTransport, MemoryTransport, Script,
    Transport,
};
