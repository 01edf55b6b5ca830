//! Drives a [`Session`] against a [`UnitHost`].
//!
//! The foreground entry points await each completion; the `_blocking`
//! variants require the host to complete before `fetch_unit` returns. In
//! both cases the driver opens a fresh [`UnitContext`](crate::context::UnitContext)
//! per fetch and seals it once the host reports back.

use tokio::sync::oneshot::error::TryRecvError;

use crate::config::{LoaderConfig, Mode};
use crate::context::Discovery;
use crate::error::{FetchError, LoaderError, Result};
use crate::export::ExportBundle;
use crate::host::{FetchCompletion, FetchOutcome, FetchRequest, UnitHost};
use crate::namespace::GlobalScope;
use crate::session::{ExecutionReport, Progress, Session, SessionOutcome};

pub struct Loader<H> {
    host: H,
    session: Session,
}

impl<H: UnitHost> Loader<H> {
    pub fn new(config: LoaderConfig, host: H) -> Self {
        Self {
            host,
            session: Session::new(config),
        }
    }

    pub fn with_global(mut self, global: GlobalScope) -> Self {
        self.session = self.session.with_global(global);
        self
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn global(&self) -> &GlobalScope {
        self.session.global()
    }

    pub fn on_ready<F>(&mut self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.session.on_ready(callback);
    }

    pub fn on_error<F>(&mut self, callback: F)
    where
        F: FnMut(&LoaderError) + Send + 'static,
    {
        self.session.on_error(callback);
    }

    pub async fn load(&mut self, entry: &str) -> Result<ExecutionReport> {
        let request = self.session.begin(entry)?;
        into_report(self.drive(request).await?)
    }

    pub async fn export(&mut self, entry: &str) -> Result<ExportBundle> {
        let request = self.session.begin_export(entry)?;
        into_bundle(self.drive(request).await?)
    }

    /// Runs whatever [`LoaderConfig::mode`] selects.
    pub async fn resolve(&mut self, entry: &str) -> Result<SessionOutcome> {
        let mode = self.session.config().mode;
        let request = self.session.start(entry, mode)?;
        self.drive(request).await
    }

    pub fn load_blocking(&mut self, entry: &str) -> Result<ExecutionReport> {
        let request = self.session.begin(entry)?;
        into_report(self.drive_blocking(request)?)
    }

    pub fn export_blocking(&mut self, entry: &str) -> Result<ExportBundle> {
        let request = self.session.begin_export(entry)?;
        into_bundle(self.drive_blocking(request)?)
    }

    pub fn resolve_blocking(&mut self, entry: &str) -> Result<SessionOutcome> {
        let mode = self.session.config().mode;
        let request = self.session.start(entry, mode)?;
        self.drive_blocking(request)
    }

    async fn drive(&mut self, mut request: FetchRequest) -> Result<SessionOutcome> {
        loop {
            let cx = self.session.open_context(&request);
            let (completion, receiver) = FetchCompletion::channel();
            self.host.fetch_unit(request.clone(), cx.clone(), completion);
            let outcome = receiver.await.unwrap_or(Err(FetchError::Abandoned));
            let discovery = cx.seal();
            match self.settle(&request, discovery, outcome)? {
                Progress::Fetch(next) => request = next,
                Progress::Finished(outcome) => return Ok(outcome),
            }
        }
    }

    fn drive_blocking(&mut self, mut request: FetchRequest) -> Result<SessionOutcome> {
        loop {
            let cx = self.session.open_context(&request);
            let (completion, mut receiver) = FetchCompletion::channel();
            self.host.fetch_unit(request.clone(), cx.clone(), completion);
            let outcome = match receiver.try_recv() {
                Ok(outcome) => outcome,
                Err(TryRecvError::Empty) => Err(FetchError::Incomplete),
                Err(TryRecvError::Closed) => Err(FetchError::Abandoned),
            };
            let discovery = cx.seal();
            match self.settle(&request, discovery, outcome)? {
                Progress::Fetch(next) => request = next,
                Progress::Finished(outcome) => return Ok(outcome),
            }
        }
    }

    fn settle(
        &mut self,
        request: &FetchRequest,
        discovery: Discovery,
        outcome: FetchOutcome,
    ) -> Result<Progress> {
        match outcome {
            Ok(()) => self.session.on_unit_loaded(request.unit, discovery),
            Err(err) => Err(self.session.on_unit_failed(request.unit, err)),
        }
    }
}

fn into_report(outcome: SessionOutcome) -> Result<ExecutionReport> {
    match outcome {
        SessionOutcome::Executed(report) => Ok(report),
        SessionOutcome::Exported(_) => Err(LoaderError::InvalidPhase {
            expected: Mode::Run.as_str(),
            actual: Mode::Export.as_str(),
        }),
    }
}

fn into_bundle(outcome: SessionOutcome) -> Result<ExportBundle> {
    match outcome {
        SessionOutcome::Exported(bundle) => Ok(bundle),
        SessionOutcome::Executed(_) => Err(LoaderError::InvalidPhase {
            expected: Mode::Export.as_str(),
            actual: Mode::Run.as_str(),
        }),
    }
}
