//! Controller notifications
//!
//! When bytes arrive from a remote endpoint the daemon fires a
//! fire-and-forget HTTP GET at the controller's action endpoint so the
//! owning plugin can read its session socket without polling. Requests are
//! bounded by a five-second budget, never follow redirects, and their
//! response bodies are discarded.

use anyhow::Result;
use reqwest::redirect::Policy;
use tracing::{debug, info, warn};

use crate::constants::{timeout, PROTOCOL_VERSION};
use crate::formatting::urlencode;

/// Per-session notification binding set via `NTFY` (or a CONN option).
///
/// A negative `device` disables notifications while keeping the binding
/// visible in STAT output.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyBinding {
    pub device: i64,
    pub service: String,
    pub action: String,
    /// Overrides the session id in notification URLs when set
    pub pid: Option<String>,
}

impl NotifyBinding {
    /// Whether this binding produces notifications.
    pub fn is_active(&self) -> bool {
        self.device >= 0
    }

    /// `dev/sid/act/pid` form used in STAT output.
    pub fn display_with(&self, default_pid: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.device,
            self.service,
            self.action,
            self.pid.as_deref().unwrap_or(default_pid)
        )
    }
}

/// Build the controller request URL for one notification.
pub fn request_url(base: &str, binding: &NotifyBinding, pid: &str) -> String {
    format!(
        "{}/data_request?id=action&output_format=json&DeviceNum={}&serviceId={}&action={}&Pid={}",
        base.trim_end_matches('/'),
        binding.device,
        urlencode(&binding.service),
        urlencode(&binding.action),
        urlencode(pid)
    )
}

/// HTTP client for notification delivery. Failures are logged, never fatal.
#[derive(Debug, Clone)]
pub struct NotifyClient {
    http: reqwest::Client,
}

impl NotifyClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout::NOTIFY)
            .redirect(Policy::none())
            // The controller is on the local network; never route
            // notifications through a system proxy
            .no_proxy()
            .user_agent(format!("sockproxyd-{}", PROTOCOL_VERSION))
            .build()?;
        Ok(Self { http })
    }

    /// Issue one notification GET, discarding the response body.
    ///
    /// A 401 means the bound action or service is undefined on the
    /// controller, which is worth a warning; every other failure is
    /// routine.
    pub async fn send(&self, url: &str) {
        let result = self
            .http
            .get(url)
            .header(reqwest::header::CONNECTION, "close")
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                drop(response);
                if status.as_u16() == 401 {
                    warn!(%url, "controller rejected notification (401); action or service undefined");
                } else if !status.is_success() {
                    info!(%url, %status, "notification not accepted");
                } else {
                    debug!(%url, "notification delivered");
                }
            }
            Err(e) => {
                info!(%url, error = %e, "notification failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding() -> NotifyBinding {
        NotifyBinding {
            device: 42,
            service: "urn:x:serviceId:X1".into(),
            action: "Handle".into(),
            pid: None,
        }
    }

    #[test]
    fn test_request_url_shape() {
        let url = request_url("http://127.0.0.1:3480", &binding(), "6f0a2");
        assert_eq!(
            url,
            "http://127.0.0.1:3480/data_request?id=action&output_format=json\
             &DeviceNum=42&serviceId=urn%3ax%3aserviceId%3aX1&action=Handle&Pid=6f0a2"
        );
    }

    #[test]
    fn test_request_url_trims_trailing_slash() {
        let url = request_url("http://127.0.0.1:3480/", &binding(), "1");
        assert!(url.starts_with("http://127.0.0.1:3480/data_request?"));
    }

    #[test]
    fn test_binding_activity() {
        assert!(binding().is_active());
        let disabled = NotifyBinding {
            device: -1,
            ..binding()
        };
        assert!(!disabled.is_active());
    }

    #[test]
    fn test_binding_display_defaults_pid() {
        assert_eq!(
            binding().display_with("abc"),
            "42/urn:x:serviceId:X1/Handle/abc"
        );

        let with_pid = NotifyBinding {
            pid: Some("custom".into()),
            ..binding()
        };
        assert_eq!(
            with_pid.display_with("abc"),
            "42/urn:x:serviceId:X1/Handle/custom"
        );
    }
}
