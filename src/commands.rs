use tracing::info;

use crate::config::MODE_ALERT;
use crate::events::AppEvent;
use crate::registry::{ActionContext, CommandRegistry, CommandSpec, ParamSpec};

/// Register the host control commands. Names already present are left alone.
pub fn register_builtin(registry: &mut CommandRegistry) {
    registry.register(
        "logiled",
        CommandSpec::new(logiled)
            .described("Sets the lighting of Logitech periphery")
            .param(ParamSpec::string("color", "name/hex/rgb", true)),
    );
    registry.register("next", CommandSpec::new(next).described("Plays next song"));
    registry.register(
        "previous",
        CommandSpec::new(previous).described("Plays previous song"),
    );
    registry.register("play", CommandSpec::new(play).described("Play/pause music"));
    registry.register("pause", CommandSpec::new(pause).described("Play/pause music"));
    registry.register("stop", CommandSpec::new(stop).described("Stops playing music"));
    registry.register(
        "lock",
        CommandSpec::new(lock)
            .described("Lock workstation of host computer")
            .admin_only(),
    );
    registry.register(
        "shutdown",
        CommandSpec::new(shutdown)
            .described("Shutdown host computer")
            .param(ParamSpec::string("when", "Minutes/Hours/Time", false))
            .admin_only(),
    );
}

/// Lighting changes are refused while an alert owns the peripherals.
fn logiled(ctx: &ActionContext, _channel: &str, args: Option<&str>) -> bool {
    info!("command: logiled");
    if ctx.config.read().host.has_mode(MODE_ALERT) {
        return false;
    }
    ctx.bus.post(AppEvent::with_payload("LOGILED", args));
    true
}

fn next(ctx: &ActionContext, _channel: &str, _args: Option<&str>) -> bool {
    info!("command: next song");
    ctx.bus.post(AppEvent::new("next"));
    true
}

fn previous(ctx: &ActionContext, _channel: &str, _args: Option<&str>) -> bool {
    info!("command: previous song");
    ctx.bus.post(AppEvent::new("previous"));
    true
}

fn play(ctx: &ActionContext, _channel: &str, _args: Option<&str>) -> bool {
    info!("command: play/pause");
    ctx.bus.post(AppEvent::new("play"));
    true
}

fn pause(ctx: &ActionContext, _channel: &str, _args: Option<&str>) -> bool {
    info!("command: play/pause");
    ctx.bus.post(AppEvent::new("pause"));
    true
}

fn stop(ctx: &ActionContext, _channel: &str, _args: Option<&str>) -> bool {
    info!("command: stop");
    ctx.bus.post(AppEvent::new("stop"));
    true
}

fn lock(ctx: &ActionContext, _channel: &str, _args: Option<&str>) -> bool {
    info!("command: lock");
    ctx.bus.post(AppEvent::new("lock"));
    true
}

fn shutdown(ctx: &ActionContext, _channel: &str, args: Option<&str>) -> bool {
    info!("command: shutdown");
    ctx.bus.post(AppEvent::with_payload("shutdown", args));
    true
}
