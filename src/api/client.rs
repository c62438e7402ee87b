//! Purpose: HTTP client for the WSDOT crash data portal.
//! Exports: `PortalClient`, `TransportMode`, `ReportWindow`, `PORTAL_BASE_URL`.
//! Role: Upstream fetch boundary; produces raw text for the dequoter.
//! Invariants: One GET per fetch; retry/backoff policy belongs to the caller.
//! Invariants: Report windows are inclusive `yyyymmdd` bounds, 8 ASCII digits.
#![allow(clippy::result_large_err)]

use crate::core::error::{Error, ErrorKind};
use std::time::Duration;
use url::Url;

type ApiResult<T> = Result<T, Error>;

pub const PORTAL_BASE_URL: &str = "https://remoteapps.wsdot.wa.gov/highwaysafety/collision/data/portal/public/CrashDataPortalService.svc/REST/GetPublicPortalData";

const REPORT_CATEGORY: &str = "Pedestrians and Pedacyclists";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportMode {
    Pedestrian,
    Bicyclist,
}

impl TransportMode {
    /// Label stamped into generated SQL rows.
    pub fn label(self) -> &'static str {
        match self {
            TransportMode::Pedestrian => "Pedestrian",
            TransportMode::Bicyclist => "Bicyclist",
        }
    }

    /// Portal report name selecting the per-mode dataset.
    pub fn report_name(self) -> &'static str {
        match self {
            TransportMode::Pedestrian => "Pedestrians by Injury Type",
            TransportMode::Bicyclist => "Bicyclists by Injury Type",
        }
    }
}

/// Inclusive fetch window, both bounds `yyyymmdd`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReportWindow {
    start: String,
    end: String,
}

impl ReportWindow {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> ApiResult<Self> {
        let start = start.into();
        let end = end.into();
        ensure_date_stamp(&start)?;
        ensure_date_stamp(&end)?;
        Ok(Self { start, end })
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn end(&self) -> &str {
        &self.end
    }
}

fn ensure_date_stamp(value: &str) -> ApiResult<()> {
    if value.len() == 8 && value.bytes().all(|byte| byte.is_ascii_digit()) {
        return Ok(());
    }
    Err(Error::new(ErrorKind::Usage)
        .with_message(format!("invalid report date '{value}'"))
        .with_hint("Use yyyymmdd, e.g. 20250101."))
}

#[derive(Clone, Debug)]
pub struct PortalClient {
    base_url: Url,
    agent: ureq::Agent,
}

impl PortalClient {
    pub fn new() -> ApiResult<Self> {
        Self::with_base_url(PORTAL_BASE_URL)
    }

    /// Override the portal endpoint, e.g. for a local test server.
    pub fn with_base_url(base_url: impl Into<String>) -> ApiResult<Self> {
        let base_url = base_url.into();
        let base_url = Url::parse(&base_url).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid portal base url '{base_url}'"))
                .with_source(err)
        })?;
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Ok(Self { base_url, agent })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Fetch the raw (possibly quote-wrapped) payload text for one mode/window.
    pub fn fetch_raw(&self, mode: TransportMode, window: &ReportWindow) -> ApiResult<String> {
        let url = self.request_url(mode, window);
        let response = self
            .agent
            .request("GET", url.as_str())
            .set("Accept", "application/json")
            .call();
        match response {
            Ok(resp) => resp.into_string().map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read portal response body")
                    .with_source(err)
            }),
            Err(ureq::Error::Status(code, _)) => Err(Error::new(ErrorKind::Io)
                .with_message(format!("portal returned status {code}"))
                .with_hint("Narrow the report window or retry later.")),
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Io)
                .with_message("portal request failed")
                .with_source(err)),
        }
    }

    fn request_url(&self, mode: TransportMode, window: &ReportWindow) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("rptCategory", REPORT_CATEGORY)
            .append_pair("rptName", mode.report_name())
            .append_pair("locationType", "")
            .append_pair("locationName", "")
            .append_pair("jurisdiction", "")
            .append_pair("reportStartDate", window.start())
            .append_pair("reportEndDate", window.end());
        url
    }
}
