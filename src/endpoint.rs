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
use crate::WsmanError;

/// The out-of-band management endpoint a client talks to. Immutable for
/// the lifetime of one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Hostname or IP address of the management controller
    pub host: String,
    /// Controller username
    pub user: String,
    /// Controller password
    pub password: String,
}

impl Endpoint {
    /// Builds an endpoint, rejecting blank fields. The error names every
    /// missing field, always in host, user, password order.
    pub fn new(host: &str, user: &str, password: &str) -> Result<Endpoint, WsmanError> {
        let mut missing = Vec::new();
        for (name, value) in [("host", host), ("user", user), ("password", password)] {
            if value.trim().is_empty() {
                missing.push(name.to_string());
            }
        }
        if !missing.is_empty() {
            return Err(WsmanError::IncompleteEndpoint { fields: missing });
        }
        Ok(Endpoint {
            host: host.to_string(),
            user: user.to_string(),
            password: password.to_string(),
        })
    }
}
