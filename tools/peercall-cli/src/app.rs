//! Interactive call screen

use crate::commands::{Command, HELP};
use crate::prompt::{run_setup, stdin_console, Console};
use peercall_core::call::{CallController, CallDeps, CallHandle, CallView, SignalingStatus};
use peercall_core::config::PeerCallConfig;
use peercall_core::devices::CatalogDevices;
use peercall_core::media::MediaDevices;
use peercall_core::setup::{DeviceList, SetupForm};
use peercall_core::signaling::SignalingTransport;
use peercall_core::Error;
use peercall_webrtc::{WebRtcEngine, WsSignalingClient};
use std::sync::Arc;
use tokio::io::AsyncBufRead;
use tracing::{info, warn};

pub async fn run(
    config: PeerCallConfig,
    name: Option<String>,
    interactive: bool,
) -> anyhow::Result<()> {
    let devices = media_devices(&config);
    let signaling = Arc::new(WsSignalingClient::from_config(&config));
    let engine = Arc::new(WebRtcEngine::from_config(&config)?);
    let mut console = stdin_console();

    let mut form = SetupForm::load(devices.as_ref()).await;
    if let Some(name) = name {
        form.set_name(name);
    }
    let setup = if interactive {
        match run_setup(&mut console, &mut form).await? {
            Some(setup) => setup,
            None => return Ok(()),
        }
    } else {
        form.confirm()?
    };

    println!("Connecting to {} as {}...", config.signaling_url, setup.name);
    let deps = CallDeps {
        signaling: signaling.clone(),
        engine,
        devices: devices.clone(),
    };
    let (handle, mut notices) = CallController::start(deps, setup, config.call).await;
    let mut views = handle.watch();
    let mut printer = ViewPrinter::default();
    printer.show(&handle.view());
    println!("Type 'help' for commands.");

    loop {
        tokio::select! {
            line = console.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match Command::parse(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => {
                        execute(command, &handle, &mut console, devices.as_ref()).await?;
                    }
                    Ok(None) => {}
                    Err(unknown) => println!("{}", unknown),
                }
            }
            changed = views.changed() => {
                if changed.is_err() {
                    warn!("Call controller stopped");
                    break;
                }
                let view = views.borrow_and_update().clone();
                printer.show(&view);
            }
            Some(notice) = notices.recv() => println!("{}", notice),
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }

    info!("Shutting down");
    if let Err(e) = handle.shutdown().await {
        warn!("Controller shutdown failed: {}", e);
    }
    signaling.disconnect().await?;
    Ok(())
}

#[cfg(feature = "system-devices")]
fn media_devices(config: &PeerCallConfig) -> Arc<dyn MediaDevices> {
    let fallback = CatalogDevices::new(config.devices.clone());
    Arc::new(crate::devices::SystemDevices::new(fallback))
}

#[cfg(not(feature = "system-devices"))]
fn media_devices(config: &PeerCallConfig) -> Arc<dyn MediaDevices> {
    Arc::new(CatalogDevices::new(config.devices.clone()))
}

async fn execute<R: AsyncBufRead + Unpin>(
    command: Command,
    handle: &CallHandle,
    console: &mut Console<R>,
    devices: &dyn MediaDevices,
) -> anyhow::Result<()> {
    let view = handle.view();
    match command {
        Command::Id => match &view.local_id {
            Some(id) => println!("Your id: {}", id),
            None => println!("Waiting for the relay to assign an id."),
        },
        Command::Call(target) => match call_blocker(&view, target.as_deref()) {
            Some(reason) => println!("{}", reason),
            None => {
                let target = target.unwrap_or_default();
                report(handle.call(target.clone()).await, &format!("Calling {}...", target));
            }
        },
        Command::Accept => report(handle.accept().await, "Answering..."),
        Command::Decline => report(handle.decline().await, "Call declined."),
        Command::HangUp => report(handle.hang_up().await, "Call ended."),
        Command::Camera => match handle.toggle_camera().await {
            Ok(on) => println!("Camera {}", if on { "on" } else { "off" }),
            Err(e) => println!("{}", describe_error(&e)),
        },
        Command::Mic => match handle.toggle_mic().await {
            Ok(on) => println!("Microphone {}", if on { "on" } else { "muted" }),
            Err(e) => println!("{}", describe_error(&e)),
        },
        Command::Status => println!("{}", render_status(&view)),
        Command::Devices => match devices.enumerate_devices().await {
            Ok(list) => println!("{}", render_devices(&DeviceList::from_devices(list))),
            Err(e) => println!("Could not list devices: {}", e),
        },
        Command::Setup => {
            if !view.state.is_quiescent() {
                println!("Finish the current call first.");
                return Ok(());
            }
            let mut form = SetupForm::load(devices).await;
            form.set_name(view.display_name.clone());
            let Some(setup) = run_setup(console, &mut form).await? else {
                return Ok(());
            };
            if setup.name != view.display_name {
                println!("Name changes take effect after a restart.");
            }
            report(
                handle.reacquire_media(setup.constraints).await,
                "Devices updated.",
            );
        }
        Command::Help => println!("{}", HELP),
        Command::Quit => {}
    }
    Ok(())
}

fn report(result: peercall_core::Result<()>, success: &str) {
    match result {
        Ok(()) => println!("{}", success),
        Err(e) => println!("{}", describe_error(&e)),
    }
}

/// Error text with a hint on what the user can do next
pub fn describe_error(error: &Error) -> String {
    if error.is_retryable() {
        format!("{} (temporary, try again)", error)
    } else if error.is_peer_error() {
        format!("{} (check your network or STUN/TURN settings)", error)
    } else {
        error.to_string()
    }
}

/// Why a call cannot be placed right now
pub fn call_blocker(view: &CallView, target: Option<&str>) -> Option<String> {
    if view.local_id.is_none() {
        return Some("Waiting for the relay to assign an id.".to_string());
    }
    if !view.state.is_quiescent() {
        return Some(format!("Already in a call: {}", view.state));
    }
    match target.map(str::trim) {
        None | Some("") => Some("Enter the id of the user to call: call <id>".to_string()),
        Some(_) => None,
    }
}

fn signaling_label(status: SignalingStatus) -> &'static str {
    match status {
        SignalingStatus::Connecting => "connecting",
        SignalingStatus::Online => "online",
        SignalingStatus::Reconnecting => "reconnecting",
        SignalingStatus::Offline => "offline",
    }
}

pub fn render_status(view: &CallView) -> String {
    let mut lines = vec![
        format!(
            "{} ({})",
            view.display_name,
            view.local_id.as_deref().unwrap_or("no id yet")
        ),
        format!("relay: {}", signaling_label(view.signaling)),
        format!("call: {}", view.state),
        format!(
            "camera: {}, microphone: {}",
            if view.camera_on { "on" } else { "off" },
            if view.mic_on { "on" } else { "muted" }
        ),
    ];

    if view.local_tracks.is_empty() {
        lines.push("self-view: no local media".to_string());
    }
    for track in &view.local_tracks {
        let status = match (track.live, track.enabled) {
            (false, _) => "stopped",
            (true, true) => "live",
            (true, false) => "paused",
        };
        lines.push(format!("self-view: {} {} ({})", track.kind, track.label, status));
    }

    if let Some(remote) = view.remote_media() {
        let kinds: Vec<String> = remote.tracks.iter().map(|t| t.kind.to_string()).collect();
        lines.push(format!("remote: {}", kinds.join(", ")));
    } else if let Some(caller) = view.incoming_caller() {
        lines.push(format!(
            "{} is calling. Type 'accept' or 'decline'.",
            caller.display_name()
        ));
    }

    lines.join("\n")
}

fn render_devices(devices: &DeviceList) -> String {
    let mut lines = vec!["Cameras:".to_string()];
    if devices.cameras.is_empty() {
        lines.push("  (none)".to_string());
    }
    for device in &devices.cameras {
        lines.push(format!("  {} [{}]", device.display_label(), device.device_id));
    }
    lines.push("Microphones:".to_string());
    if devices.microphones.is_empty() {
        lines.push("  (none)".to_string());
    }
    for device in &devices.microphones {
        lines.push(format!("  {} [{}]", device.display_label(), device.device_id));
    }
    lines.join("\n")
}

/// Prints what changed between successive views
#[derive(Default)]
struct ViewPrinter {
    last: Option<CallView>,
}

impl ViewPrinter {
    fn show(&mut self, view: &CallView) {
        for line in view_changes(self.last.as_ref(), view) {
            println!("{}", line);
        }
        self.last = Some(view.clone());
    }
}

fn view_changes(previous: Option<&CallView>, view: &CallView) -> Vec<String> {
    let mut lines = Vec::new();

    if previous.map(|p| p.signaling) != Some(view.signaling) {
        lines.push(format!("relay: {}", signaling_label(view.signaling)));
    }
    if previous.and_then(|p| p.local_id.as_ref()) != view.local_id.as_ref() {
        if let Some(id) = &view.local_id {
            lines.push(format!("Your id: {}", id));
        }
    }
    if previous.map(|p| &p.state) != Some(&view.state) {
        let had_remote = previous.and_then(|p| p.remote_media()).is_some();
        match view.remote_media() {
            Some(remote) if !had_remote => {
                let kinds: Vec<String> =
                    remote.tracks.iter().map(|t| t.kind.to_string()).collect();
                lines.push(format!("call: {}, receiving {}", view.state, kinds.join(", ")));
            }
            _ => lines.push(format!("call: {}", view.state)),
        }
    }

    lines
}
