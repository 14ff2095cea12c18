//! Command execution against an [`AuthClient`]

use oidc_session::{
    AccountSwitchRequest, AuthClient, CustomGrantOutcome, CustomGrantRequest, InitOutcome,
    SignInOutcome, SignOutOutcome,
};
use tracing::{debug, warn};
use url::Url;

use crate::cli::{Commands, GrantArgs};
use crate::error::{CliError, CliResult};
use crate::formatter::Formatter;

const SIGN_IN_PROMPT: &str =
    "Open this URL to sign in, then run `sign-in --callback <redirect URL>`:";
const SIGN_OUT_PROMPT: &str = "Open this URL to end the session at the provider:";

/// Run one command
pub async fn execute(client: &AuthClient, command: Commands, out: &Formatter) -> CliResult<()> {
    match command {
        Commands::SignIn { callback } => sign_in(client, callback.as_deref(), out).await,
        Commands::Token => out.display_token(&client.get_access_token().await?),
        Commands::UserInfo => out.display_user(&client.get_user_info().await?),
        Commands::SignOut => match client.sign_out().await? {
            SignOutOutcome::Redirected(url) | SignOutOutcome::LogoutUrl(url) => {
                out.display_url(SIGN_OUT_PROMPT, &url)
            }
        },
        Commands::Revoke => {
            client.end_user_session().await?;
            out.display_success("Access token revoked and local session cleared");
            Ok(())
        }
        Commands::Endpoints { discover } => endpoints(client, discover, out).await,
        Commands::Grant(args) => grant(client, &args, out).await,
        Commands::SwitchAccount {
            username,
            userstore_domain,
            tenant_domain,
        } => {
            let request = AccountSwitchRequest::new(username, userstore_domain, tenant_domain);
            out.display_user(&client.switch_account(request).await?)
        }
    }
}

async fn sign_in(client: &AuthClient, callback: Option<&str>, out: &Formatter) -> CliResult<()> {
    let location = callback
        .map(|raw| {
            Url::parse(raw)
                .map_err(|e| CliError::InvalidArguments(format!("invalid callback URL: {e}")))
        })
        .transpose()?;

    match client.sign_in(location.as_ref()).await? {
        SignInOutcome::SignedIn(user) => {
            out.display_success("Signed in");
            out.display_user(&user)
        }
        SignInOutcome::Redirected(url) | SignInOutcome::AuthorizationRequired { url, .. } => {
            if location.is_some() {
                warn!("Callback did not complete the sign-in; a new authorization is required");
            }
            out.display_url(SIGN_IN_PROMPT, &url)
        }
    }
}

async fn endpoints(client: &AuthClient, discover: bool, out: &Formatter) -> CliResult<()> {
    if discover {
        let outcome = client
            .tokens()
            .metadata()
            .ensure_initialized(client.config(), false)
            .await?;
        match outcome {
            InitOutcome::DefaultEndpoints(unavailable) => warn!(
                url = %unavailable.url,
                reason = %unavailable.reason,
                "Discovery failed, using default endpoints"
            ),
            other => debug!(fetched = other.fetched(), "Provider metadata ready"),
        }
    }

    match client.service_endpoints()? {
        Some(provider) => out.display_endpoints(&provider),
        None => {
            out.display_notice("No provider endpoints stored; run `endpoints --discover`");
            Ok(())
        }
    }
}

async fn grant(client: &AuthClient, args: &GrantArgs, out: &Formatter) -> CliResult<()> {
    let mut request = CustomGrantRequest::new()
        .attach_token(args.attach_token)
        .returns_session(args.returns_session)
        .return_response(args.response)
        .sign_in_required(args.require_session);
    for raw in &args.params {
        let (key, value) = parse_param(raw)?;
        request = request.param(key, value);
    }

    match client.custom_grant(&request).await? {
        CustomGrantOutcome::SignedIn(user) => out.display_user(&user),
        CustomGrantOutcome::Response(response) => out.display_response(&response),
        CustomGrantOutcome::Success => {
            out.display_success("Grant accepted");
            Ok(())
        }
    }
}

/// Split a `KEY=VALUE` form parameter at the first `=`
pub fn parse_param(raw: &str) -> CliResult<(&str, &str)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => Err(CliError::InvalidArguments(format!(
            "expected KEY=VALUE, got `{raw}`"
        ))),
    }
}
