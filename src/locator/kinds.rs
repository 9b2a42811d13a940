//! Handle resolution for each locator shape

use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, instrument};

use super::retry::RetryContext;
use super::{Locator, Visibility};
use crate::session::{dispose_detached, dispose_quietly, HandleGuard};
use crate::session::traits::{
    EvalArg, HandleRef, PageContext, WaitForFunctionOptions, WaitForSelectorOptions,
};
use crate::{Error, Result};

/// What a locator resolves
#[derive(Debug, Clone)]
pub enum LocatorKind {
    /// Element matching a selector in a page or frame
    Node {
        page: Arc<dyn PageContext>,
        selector: String,
    },
    /// Truthy result of a polled page function
    Function {
        page: Arc<dyn PageContext>,
        script: String,
    },
    /// Delegate's handle once `predicate(handle)` holds
    Filtered {
        delegate: Box<Locator>,
        predicate: String,
    },
    /// Handle returned by `mapper(handle)` on the delegate's handle
    Mapped {
        delegate: Box<Locator>,
        mapper: String,
    },
    /// First of several locators to resolve
    Race(Vec<Locator>),
}

impl Locator {
    /// Resolve a handle once, without retrying
    ///
    /// On error nothing acquired during the attempt is left undisposed.
    pub(crate) fn resolve<'a>(&'a self, ctx: &'a RetryContext) -> BoxFuture<'a, Result<HandleRef>> {
        match &self.kind {
            LocatorKind::Node { page, selector } => self.resolve_node(page, selector, ctx).boxed(),
            LocatorKind::Function { page, script } => ctx
                .guard(page.wait_for_function(
                    script,
                    WaitForFunctionOptions {
                        timeout: ctx.remaining_ms(),
                        ..Default::default()
                    },
                    Vec::new(),
                ))
                .boxed(),
            LocatorKind::Filtered { delegate, predicate } => {
                self.resolve_filtered(delegate, predicate, ctx).boxed()
            }
            LocatorKind::Mapped { delegate, mapper } => resolve_mapped(delegate, mapper, ctx).boxed(),
            LocatorKind::Race(locators) => resolve_race(locators, ctx).boxed(),
        }
    }

    #[instrument(skip(self, page, ctx))]
    async fn resolve_node(
        &self,
        page: &Arc<dyn PageContext>,
        selector: &str,
        ctx: &RetryContext,
    ) -> Result<HandleRef> {
        let options = WaitForSelectorOptions {
            timeout: ctx.remaining_ms(),
            visible: self.options.visibility == Some(Visibility::Visible),
            hidden: self.options.visibility == Some(Visibility::Hidden),
        };
        ctx.guard(page.wait_for_selector(selector, options))
            .await?
            .ok_or_else(|| Error::element_not_found(selector))
    }

    async fn resolve_filtered(
        &self,
        delegate: &Locator,
        predicate: &str,
        ctx: &RetryContext,
    ) -> Result<HandleRef> {
        let handle = HandleGuard::new(delegate.resolve(ctx).await?);
        let matched = ctx
            .guard(handle.handle().world().wait_for_function(
                predicate,
                WaitForFunctionOptions {
                    timeout: self.options.timeout,
                    ..Default::default()
                },
                Vec::new(),
                vec![EvalArg::from(handle.handle())],
            ))
            .await;

        match matched {
            Ok(result) => {
                dispose_quietly(&result).await;
                Ok(handle.into_inner())
            }
            Err(e) => {
                debug!("Filter predicate did not hold: {}", e);
                handle.dispose().await;
                Err(e)
            }
        }
    }
}

async fn resolve_mapped(delegate: &Locator, mapper: &str, ctx: &RetryContext) -> Result<HandleRef> {
    let handle = HandleGuard::new(delegate.resolve(ctx).await?);
    let mapped = ctx.guard(handle.handle().evaluate_handle(mapper, Vec::new())).await;
    handle.dispose().await;
    mapped
}

/// Resolve every locator concurrently; the first handle wins
#[instrument(skip(locators, ctx), fields(branches = locators.len()))]
async fn resolve_race(locators: &[Locator], ctx: &RetryContext) -> Result<HandleRef> {
    if locators.is_empty() {
        return Err(Error::element_not_found("race over no locators"));
    }

    let race = ctx.child();
    let _cancel = race.cancel_on_drop();
    let (tx, rx) = mpsc::unbounded_channel::<Result<HandleRef>>();
    let mut inbox = RaceInbox(Some(rx));
    for locator in locators {
        let locator = locator.clone();
        let branch = race.child();
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = locator.resolve(&branch).await;
            if let Err(mpsc::error::SendError(Ok(handle))) = tx.send(result) {
                dispose_quietly(&handle).await;
            }
        });
    }
    drop(tx);

    let mut last_error = None;
    let winner = loop {
        match inbox.recv().await {
            Some(Ok(handle)) => break Some(handle),
            Some(Err(e)) => last_error = Some(e),
            None => break None,
        }
    };
    race.cancel();

    match winner {
        Some(handle) => {
            if let Some(rx) = inbox.0.take() {
                tokio::spawn(dispose_late_arrivals(rx));
            }
            Ok(handle)
        }
        None => Err(last_error.unwrap_or_else(|| Error::element_not_found("race produced no handle"))),
    }
}

/// Receiving end of a race
///
/// Dropped before the race settles, it disposes every handle already queued;
/// branches finishing later see the closed channel and dispose their own.
struct RaceInbox(Option<mpsc::UnboundedReceiver<Result<HandleRef>>>);

impl RaceInbox {
    async fn recv(&mut self) -> Option<Result<HandleRef>> {
        match self.0.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

impl Drop for RaceInbox {
    fn drop(&mut self) {
        let Some(mut rx) = self.0.take() else {
            return;
        };
        rx.close();
        while let Ok(result) = rx.try_recv() {
            if let Ok(handle) = result {
                dispose_detached(handle);
            }
        }
    }
}

/// Dispose handles from branches that resolved after the winner
async fn dispose_late_arrivals(mut rx: mpsc::UnboundedReceiver<Result<HandleRef>>) {
    while let Some(result) = rx.recv().await {
        if let Ok(handle) = result {
            debug!("Disposing late race handle {}", handle.id());
            dispose_quietly(&handle).await;
        }
    }
}
