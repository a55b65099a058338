//! tp auth command implementation

use super::{AuthCommands, Context};
use crate::auth::TokenGrant;
use crate::error::Result;
use crate::output::{emit_success, HumanOutput};

pub(super) async fn run(ctx: &Context, cmd: AuthCommands) -> Result<()> {
    match cmd {
        AuthCommands::Status => run_status(ctx, "auth status", "tp auth status"),
        AuthCommands::Login {
            access_token,
            refresh_token,
            expires_in,
        } => {
            ctx.session
                .login(TokenGrant::new(access_token, refresh_token, expires_in))?;
            run_status(ctx, "auth login", "tp auth login: session stored")
        }
        AuthCommands::Refresh => {
            ctx.session.refresh_session().await?;
            run_status(ctx, "auth refresh", "tp auth refresh: token renewed")
        }
        AuthCommands::Logout => {
            ctx.session.logout()?;
            run_status(ctx, "auth logout", "tp auth logout: session cleared")
        }
    }
}

fn run_status(ctx: &Context, command: &str, header: &str) -> Result<()> {
    let status = ctx.session.status();

    let mut human = HumanOutput::new(header);
    human.push_summary(
        "authenticated",
        if status.authenticated { "yes" } else { "no" },
    );
    if let Some(expires_at) = status.expires_at.as_deref() {
        human.push_summary("expires", expires_at);
    }
    if let Some(name) = status.name.as_deref() {
        human.push_summary("name", name);
    }
    if let Some(email) = status.email.as_deref() {
        human.push_summary("email", email);
    }
    human.push_summary("token endpoint", ctx.settings.auth.token_url.as_str());
    if !status.authenticated {
        human.push_next_step("tp auth login --access-token <token> --refresh-token <token>");
    }

    emit_success(ctx.output, command, &status, Some(&human))
}
