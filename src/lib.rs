/*
 * SPDX-License-Identifier: MIT
 *
 * Permission is hereby granted, free of charge, to any person obtaining a
 * copy of this software and associated documentation files (the "Software"),
 * to deal in the Software without restriction, including without limitation
 * the rights to use, copy, modify, merge, publish, distribute, sublicense,
 * and/or sell copies of the Software, and to permit persons to whom the
 * Software is furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL
 * THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
 * DEALINGS IN THE SOFTWARE.
 */

//! WS-Man client and firmware update orchestration for server lifecycle
//! controllers.
//!
//! The crate is layered bottom-up: [`invoke::WsmanInvoker`] runs one
//! protocol call through the external wsman tool and retries the channel's
//! transient failures; [`parse`] decodes SOAP envelopes into flat
//! mappings; [`gateway::WsmanGateway`] builds named controller operations
//! from the two; [`firmware::FirmwareOrchestrator`] drives the deployment
//! pipeline on top. Out-of-band channels are flaky by nature, so every
//! network-facing layer classifies failures before deciding to retry.

pub mod endpoint;
pub mod error;
pub mod firmware;
pub mod gateway;
pub mod invoke;
pub mod parse;
pub mod transport;

pub use endpoint::Endpoint;
pub use error::WsmanError;
pub use firmware::{FirmwareItem, FirmwareJob, FirmwareOrchestrator, JobState, Timing};
pub use gateway::{Controller, LifecycleJob, WsmanGateway};
pub use invoke::{FailureClass, InvokeOptions, Method, WsmanInvoker};
pub use parse::Envelope;
pub use transport::{BmcReset, CommandOutput, CommandRunner, ProcessRunner};
