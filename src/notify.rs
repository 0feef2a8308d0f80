//! Push payloads, notification rendering, and activation handling.
//!
//! The worker never draws anything itself: it hands a fully-defaulted
//! [`Notification`] to a [`ClientSurface`], the host capability that owns
//! windows and the notification tray.

use serde::Deserialize;
use tracing::{debug, info};

use crate::config::Config;

pub const ACTION_VIEW: &str = "view";
pub const ACTION_DISMISS: &str = "dismiss";

/// Inbound push payload. Every field is optional; absent fields get
/// defaults at render time.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PushPayload {
  pub title: Option<String>,
  pub body: Option<String>,
  pub icon: Option<String>,
  pub badge: Option<String>,
  pub tag: Option<String>,
  pub data: Option<PushData>,
  pub require_interaction: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PushData {
  pub url: Option<String>,
}

/// A rendered notification, ready for the host to display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: Option<String>,
  pub badge: Option<String>,
  pub tag: String,
  /// Absolute URL the `view` action navigates to.
  pub url: String,
  pub require_interaction: bool,
  pub actions: Vec<NotificationAction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

/// An open client window as the host reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientWindow {
  pub id: u64,
  pub url: String,
}

/// Host capability: windows, focus, and the notification tray.
pub trait ClientSurface: Send + Sync {
  /// Display a notification.
  fn show_notification(&self, notification: &Notification);

  /// Currently open client windows.
  fn windows(&self) -> Vec<ClientWindow>;

  /// Focus a window. Returns false if it is gone.
  fn focus(&self, id: u64) -> bool;

  /// Open a new window at `url`.
  fn open(&self, url: &str);

  /// Take control of all open clients immediately.
  fn claim(&self);
}

/// Surface for headless runs: logs what the host would have drawn.
#[derive(Debug, Default)]
pub struct LogSurface;

impl ClientSurface for LogSurface {
  fn show_notification(&self, notification: &Notification) {
    info!(
      title = %notification.title,
      tag = %notification.tag,
      url = %notification.url,
      "Notification shown"
    );
  }

  fn windows(&self) -> Vec<ClientWindow> {
    Vec::new()
  }

  fn focus(&self, _id: u64) -> bool {
    false
  }

  fn open(&self, url: &str) {
    info!(url, "Window opened");
  }

  fn claim(&self) {
    info!("Clients claimed");
  }
}

/// Renders push payloads and routes notification activations.
pub struct Presenter {
  site_name: String,
  origin: String,
  homepage: String,
}

impl Presenter {
  pub fn new(config: &Config) -> Self {
    Self {
      site_name: config.site_name.clone(),
      origin: config.origin.trim_end_matches('/').to_string(),
      homepage: config.homepage.clone(),
    }
  }

  fn resolve(&self, path_or_url: &str) -> String {
    if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
      path_or_url.to_string()
    } else {
      format!("{}{}", self.origin, path_or_url)
    }
  }

  /// Render an inbound push and hand it to the surface.
  ///
  /// Absent or unparsable payloads are dropped; the returned value is
  /// what was shown, if anything.
  pub fn present(
    &self,
    surface: &dyn ClientSurface,
    payload: Option<&str>,
  ) -> Option<Notification> {
    let Some(raw) = payload else {
      debug!("Push event without payload ignored");
      return None;
    };

    let payload: PushPayload = match serde_json::from_str(raw) {
      Ok(payload) => payload,
      Err(e) => {
        debug!(error = %e, "Unparsable push payload ignored");
        return None;
      }
    };

    let url = payload
      .data
      .and_then(|data| data.url)
      .unwrap_or_else(|| self.homepage.clone());

    let notification = Notification {
      title: payload.title.unwrap_or_else(|| self.site_name.clone()),
      body: payload
        .body
        .unwrap_or_else(|| format!("New update from {}", self.site_name)),
      icon: payload.icon,
      badge: payload.badge,
      tag: payload.tag.unwrap_or_else(|| "site-push".to_string()),
      url: self.resolve(&url),
      require_interaction: payload.require_interaction.unwrap_or(false),
      actions: vec![
        NotificationAction {
          action: ACTION_VIEW.to_string(),
          title: "View".to_string(),
        },
        NotificationAction {
          action: ACTION_DISMISS.to_string(),
          title: "Dismiss".to_string(),
        },
      ],
    };

    surface.show_notification(&notification);
    Some(notification)
  }

  /// Handle a notification activation.
  ///
  /// `view` focuses a window already showing the target URL, or opens a
  /// new one. Dismiss and anything unrecognized close the notification
  /// and do nothing else.
  pub fn activate(&self, surface: &dyn ClientSurface, action: &str, data: &serde_json::Value) {
    if action != ACTION_VIEW {
      return;
    }

    let target = data
      .get("url")
      .and_then(|value| value.as_str())
      .unwrap_or(&self.homepage);
    let target = self.resolve(target);

    for window in surface.windows() {
      if window.url == target && surface.focus(window.id) {
        return;
      }
    }

    surface.open(&target);
  }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  #[derive(Debug, PartialEq, Eq)]
  enum SurfaceCall {
    Shown(String),
    Focused(u64),
    Opened(String),
  }

  #[derive(Default)]
  struct RecordingSurface {
    windows: Vec<ClientWindow>,
    calls: Mutex<Vec<SurfaceCall>>,
  }

  impl RecordingSurface {
    fn with_window(id: u64, url: &str) -> Self {
      Self {
        windows: vec![ClientWindow {
          id,
          url: url.to_string(),
        }],
        calls: Mutex::new(Vec::new()),
      }
    }

    fn calls(self) -> Vec<SurfaceCall> {
      self.calls.into_inner().unwrap()
    }
  }

  impl ClientSurface for RecordingSurface {
    fn show_notification(&self, notification: &Notification) {
      self
        .calls
        .lock()
        .unwrap()
        .push(SurfaceCall::Shown(notification.title.clone()));
    }

    fn windows(&self) -> Vec<ClientWindow> {
      self.windows.clone()
    }

    fn focus(&self, id: u64) -> bool {
      self.calls.lock().unwrap().push(SurfaceCall::Focused(id));
      true
    }

    fn open(&self, url: &str) {
      self
        .calls
        .lock()
        .unwrap()
        .push(SurfaceCall::Opened(url.to_string()));
    }

    fn claim(&self) {}
  }

  fn presenter() -> Presenter {
    Presenter::new(&Config::default())
  }

  #[test]
  fn empty_payload_gets_defaults_and_both_actions() {
    let surface = RecordingSurface::default();
    let shown = presenter().present(&surface, Some("{}")).unwrap();

    assert_eq!(shown.title, "Sitekeeper");
    assert_eq!(shown.body, "New update from Sitekeeper");
    assert_eq!(shown.tag, "site-push");
    assert_eq!(shown.url, "http://localhost:8000/");
    assert!(!shown.require_interaction);
    let actions: Vec<&str> = shown.actions.iter().map(|a| a.action.as_str()).collect();
    assert_eq!(actions, vec!["view", "dismiss"]);
    assert_eq!(surface.calls(), vec![SurfaceCall::Shown("Sitekeeper".to_string())]);
  }

  #[test]
  fn provided_fields_pass_through() {
    let surface = RecordingSurface::default();
    let shown = presenter()
      .present(
        &surface,
        Some(
          r#"{"title":"Visa news","body":"Rules changed","tag":"visa",
              "data":{"url":"/visa.html"},"requireInteraction":true}"#,
        ),
      )
      .unwrap();

    assert_eq!(shown.title, "Visa news");
    assert_eq!(shown.body, "Rules changed");
    assert_eq!(shown.tag, "visa");
    assert_eq!(shown.url, "http://localhost:8000/visa.html");
    assert!(shown.require_interaction);
  }

  #[test]
  fn absent_or_malformed_payloads_are_dropped() {
    let surface = RecordingSurface::default();
    let p = presenter();
    assert!(p.present(&surface, None).is_none());
    assert!(p.present(&surface, Some("not json")).is_none());
    assert!(surface.calls().is_empty());
  }

  #[test]
  fn view_focuses_an_existing_window() {
    let surface = RecordingSurface::with_window(7, "http://localhost:8000/visa.html");
    presenter().activate(
      &surface,
      ACTION_VIEW,
      &serde_json::json!({"url": "/visa.html"}),
    );

    assert_eq!(surface.calls(), vec![SurfaceCall::Focused(7)]);
  }

  #[test]
  fn view_opens_a_window_when_none_matches() {
    let surface = RecordingSurface::with_window(7, "http://localhost:8000/other.html");
    presenter().activate(
      &surface,
      ACTION_VIEW,
      &serde_json::json!({"url": "/visa.html"}),
    );

    assert_eq!(
      surface.calls(),
      vec![SurfaceCall::Opened("http://localhost:8000/visa.html".to_string())]
    );
  }

  #[test]
  fn dismiss_and_unknown_actions_do_nothing() {
    let surface = RecordingSurface::with_window(7, "http://localhost:8000/");
    let p = presenter();
    p.activate(&surface, ACTION_DISMISS, &serde_json::json!({}));
    p.activate(&surface, "share", &serde_json::json!({"url": "/"}));

    assert!(surface.calls().is_empty());
  }

  #[test]
  fn view_without_url_targets_the_homepage() {
    let surface = RecordingSurface::default();
    presenter().activate(&surface, ACTION_VIEW, &serde_json::json!({}));

    assert_eq!(
      surface.calls(),
      vec![SurfaceCall::Opened("http://localhost:8000/".to_string())]
    );
  }
}
