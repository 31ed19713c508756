use std::{fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use docmigrate_store::Store;
use sha3::{Digest, Sha3_256};

/// Forward or reverse logic of a [`ChangeUnit`].
///
/// Any `Fn(Store) -> impl Future<Output = anyhow::Result<()>>` is a handler,
/// so plain `async fn`s can be registered directly.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, store: &Store) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Store) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, store: &Store) -> anyhow::Result<()> {
        (self)(store.clone()).await
    }
}

/// One versioned migration step.
#[derive(Clone)]
pub struct ChangeUnit {
    id: String,
    order: String,
    author: String,
    content: String,
    checksum: Option<String>,
    run_always: bool,
    execution: Option<Arc<dyn Handler>>,
    rollback: Option<Arc<dyn Handler>>,
}

impl ChangeUnit {
    /// Orders are compared as strings, `"010"` sorts after `"009"` but
    /// `"10"` sorts before `"9"`.
    pub fn new(
        id: impl Into<String>,
        order: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            order: order.into(),
            author: author.into(),
            content: String::new(),
            checksum: None,
            run_always: false,
            execution: None,
            rollback: None,
        }
    }

    pub fn execute<H: Handler + 'static>(mut self, handler: H) -> Self {
        self.execution = Some(Arc::new(handler));
        self
    }

    pub fn rollback<H: Handler + 'static>(mut self, handler: H) -> Self {
        self.rollback = Some(Arc::new(handler));
        self
    }

    /// Declares the logical content of the unit. Changing it after the unit
    /// ran is reported as checksum drift.
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Overrides the computed checksum.
    pub fn checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// Executes the unit on every run, even once recorded as executed.
    pub fn run_always(mut self) -> Self {
        self.run_always = true;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn order(&self) -> &str {
        &self.order
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn is_run_always(&self) -> bool {
        self.run_always
    }

    pub fn is_reversible(&self) -> bool {
        self.rollback.is_some()
    }

    pub(crate) fn has_execution(&self) -> bool {
        self.execution.is_some()
    }

    pub fn current_checksum(&self) -> String {
        if let Some(checksum) = &self.checksum {
            return checksum.to_owned();
        }

        let mut hasher = Sha3_256::new();
        for field in [&self.id, &self.order, &self.author, &self.content] {
            hasher.update(field.as_bytes());
            hasher.update([0u8]);
        }

        format!("{:x}", hasher.finalize())
    }

    pub(crate) async fn run_execute(&self, store: &Store) -> anyhow::Result<()> {
        match &self.execution {
            Some(handler) => handler.handle(store).await,
            None => Err(anyhow::anyhow!("change unit `{}` has no execution", self.id)),
        }
    }

    pub(crate) async fn run_rollback(&self, store: &Store) -> anyhow::Result<()> {
        match &self.rollback {
            Some(handler) => handler.handle(store).await,
            None => Err(anyhow::anyhow!("change unit `{}` has no rollback", self.id)),
        }
    }
}

impl fmt::Debug for ChangeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeUnit")
            .field("id", &self.id)
            .field("order", &self.order)
            .field("author", &self.author)
            .field("run_always", &self.run_always)
            .field("reversible", &self.is_reversible())
            .finish()
    }
}
