use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use zerocall::platform::RemoteTrack;
use zerocall::{
    CallController, CallDeps, CallError, CallRole, CallSession, CommandClipboard, ConnectionState,
    ConsoleNotifier, FailureKind, HostMediaDevices, I18n, RtcPeerConnector, SessionSettings,
    UiEvent, UiUpdate, ZeroCallConfig,
};

const USAGE: &str = "Usage: zerocall [--config <path>] [--invite <link-or-token>] [--lang <code>] [--synthetic-media]";

#[derive(Debug, Default)]
struct Options {
    config: Option<PathBuf>,
    invite: Option<String>,
    lang: Option<String>,
    synthetic_media: bool,
    help: bool,
}

fn parse_args(args: &[String]) -> anyhow::Result<Options> {
    let mut options = Options::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                let path = args.get(i).ok_or_else(|| anyhow::anyhow!("--config needs a path"))?;
                options.config = Some(PathBuf::from(path));
            }
            "--invite" => {
                i += 1;
                let invite = args.get(i).ok_or_else(|| anyhow::anyhow!("--invite needs a link or token"))?;
                options.invite = Some(invite.clone());
            }
            "--lang" => {
                i += 1;
                let lang = args.get(i).ok_or_else(|| anyhow::anyhow!("--lang needs a locale code"))?;
                options.lang = Some(lang.clone());
            }
            "--synthetic-media" => options.synthetic_media = true,
            "-h" | "--help" => options.help = true,
            other => anyhow::bail!("Unknown argument: {}\n{}", other, USAGE),
        }
        i += 1;
    }
    Ok(options)
}

enum RemoteEvent {
    Connected,
    Track(RemoteTrack),
    Failed(CallError),
    Closed,
}

/// Next thing the remote side did. The responder's first wait is bounded
/// by the remote-media timeout.
async fn next_remote_event(session: &mut CallSession) -> RemoteEvent {
    if session.state() == ConnectionState::AwaitingRemoteMedia {
        match session.wait_until_connected().await {
            Ok(()) => RemoteEvent::Connected,
            Err(e) => RemoteEvent::Failed(e),
        }
    } else {
        match session.next_remote_track().await {
            Some(track) => RemoteEvent::Track(track),
            None => RemoteEvent::Closed,
        }
    }
}

async fn speaking_changed(rx: &mut Option<watch::Receiver<bool>>) -> Option<bool> {
    match rx {
        Some(receiver) => match receiver.changed().await {
            Ok(()) => Some(*receiver.borrow_and_update()),
            Err(_) => {
                *rx = None;
                None
            }
        },
        None => std::future::pending().await,
    }
}

fn print_labels(i18n: &I18n, update: &UiUpdate) {
    if let UiUpdate::Labels { mic, cam } = update {
        println!("[m] {}  [c] {}", mic, cam);
    } else {
        println!("{}", i18n.translate("call_controls"));
    }
}

/// Terminal states end the program; a rejected response code does not.
fn is_terminal(state: ConnectionState) -> bool {
    matches!(state, ConnectionState::Failed(kind) if kind != FailureKind::InvalidResponseCode)
}

async fn run(controller: &mut CallController) -> anyhow::Result<()> {
    let i18n = controller.session().i18n().clone();
    let role = controller.session().role();
    match role {
        CallRole::Initiator => println!("{}", i18n.translate("create_invite_prompt")),
        CallRole::Responder => println!("{}", i18n.translate("accept_invite_prompt")),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut speaking: Option<watch::Receiver<bool>> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted");
                break;
            }
            event = next_remote_event(controller.session_mut()) => match event {
                RemoteEvent::Connected | RemoteEvent::Track(_) => {
                    if speaking.is_none() {
                        speaking = controller.session().speaking_updates();
                    }
                    if let Some((mic, cam)) = controller.toggle_labels() {
                        print_labels(&i18n, &UiUpdate::Labels { mic, cam });
                    }
                }
                RemoteEvent::Failed(e) => {
                    log::error!("{}", e);
                    break;
                }
                RemoteEvent::Closed => {
                    log::info!("Remote side closed the link");
                    break;
                }
            },
            Some(now_speaking) = speaking_changed(&mut speaking) => {
                let key = if now_speaking { "remote_speaking" } else { "remote_quiet" };
                println!("{}", i18n.translate(key));
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let input = line.trim();
                let state = controller.session().state();
                let event = match (input, state) {
                    ("q", _) => break,
                    ("m", _) => UiEvent::ToggleMic,
                    ("c", _) => UiEvent::ToggleCam,
                    ("", ConnectionState::Idle) => match role {
                        CallRole::Initiator => UiEvent::CreateInvitation,
                        CallRole::Responder => UiEvent::AcceptInvitation,
                    },
                    ("", _) => continue,
                    (code, _) => {
                        controller.dispatch(UiEvent::CloseError).await?;
                        UiEvent::SubmitResponse(code.to_string())
                    }
                };

                match controller.dispatch(event).await {
                    Ok(UiUpdate::InvitationReady(invitation)) => {
                        println!("{}:\n{}\n", i18n.translate("invitation_link"), invitation.link);
                        println!("{}", i18n.translate("paste_response_prompt"));
                    }
                    Ok(UiUpdate::ResponseReady(response)) => {
                        println!("{}:\n{}\n", i18n.translate("response_code"), response.token);
                    }
                    Ok(update) => print_labels(&i18n, &update),
                    // Already shown on the notification surface
                    Err(e) => log::debug!("{}", e),
                }
                if is_terminal(controller.session().state()) {
                    break;
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    zerocall::init_logging();

    let args: Vec<String> = env::args().skip(1).collect();
    let options = parse_args(&args)?;
    if options.help {
        println!("{}", USAGE);
        return Ok(());
    }

    let mut config = match &options.config {
        Some(path) => ZeroCallConfig::load_from_file(path)?,
        None => ZeroCallConfig::load_or_default(),
    };
    if options.synthetic_media {
        config.media.require_devices = false;
    }
    config.validate()?;

    let i18n = I18n::new();
    i18n.initialize(options.lang.as_deref().or(config.locale.language.as_deref()));

    let deps = CallDeps {
        connector: Arc::new(RtcPeerConnector::new()?),
        media: Arc::new(HostMediaDevices::new(config.media.require_devices)),
        clipboard: Arc::new(CommandClipboard::new()),
        notifier: Arc::new(ConsoleNotifier::new()),
        i18n: i18n.clone(),
    };
    let session = CallSession::new(
        options.invite.as_deref(),
        SessionSettings::from_config(&config)?,
        deps,
    );

    let mut controller = CallController::new(session);
    let result = run(&mut controller).await;
    controller.session_mut().close().await?;
    println!("{}", i18n.translate("call_ended"));
    result
}
