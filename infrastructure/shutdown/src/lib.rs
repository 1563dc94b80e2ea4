// Copyright 2023, The Weavegate Project
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! A convenient shutdown signal.
//!
//! `Shutdown` is a one-shot trigger shared by all long-running tasks of a process. Each task holds a
//! [ShutdownSignal], a clonable future that resolves once [Shutdown::trigger] has been called (or the
//! `Shutdown` dropped), and typically selects on it next to its own work.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;

/// The owning half of the shutdown pair. Triggering it, or dropping it, resolves every signal handed
/// out by [Shutdown::to_signal].
#[derive(Debug)]
pub struct Shutdown {
    sender: Option<oneshot::Sender<()>>,
    signal: ShutdownSignal,
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, receiver) = oneshot::channel();
        // A dropped-without-trigger sender also resolves the receiver, which is what we want: no
        // task may outlive the process that spawned it.
        let inner: BoxFuture<'static, ()> = receiver.map(|_| ()).boxed();
        Self {
            sender: Some(sender),
            signal: ShutdownSignal {
                inner: inner.shared(),
            },
        }
    }

    /// Convert this into a [ShutdownSignal], discarding the ability to trigger it.
    pub fn to_signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    /// Trigger the shutdown. All current and future signals resolve. Idempotent.
    pub fn trigger(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(());
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.sender.is_none()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves when the matching [Shutdown] is triggered or dropped.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    inner: Shared<BoxFuture<'static, ()>>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        self.inner.peek().is_some()
    }

    /// Wait for the trigger without consuming the signal.
    pub async fn wait(&mut self) {
        self.inner.clone().await
    }
}

impl Future for ShutdownSignal {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().inner.poll_unpin(cx)
    }
}
