//! Subcommand implementations.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context as _, Result};
use serde_json::Value;
use tracing::{debug, warn};

use sqlcoach_core::api::ApiError;
use sqlcoach_core::auth::{
    CredentialStore, ExpiryNotice, FileStore, KeyValueStore, Session, SessionState,
};
use sqlcoach_core::cache::ProgressCache;
use sqlcoach_core::utils::{format_date, format_remaining, truncate_string};
use sqlcoach_core::{ApiClient, Config, HttpTransport, ReqwestTransport, User};

use crate::cli::{Command, GetArgs, LoginArgs, LogoutArgs, RegisterArgs};

/// Cache entry name for the learning progress payload
const PROGRESS_CACHE: &str = "progress";

const PROGRESS_PATH: &str = "/progress";

/// Everything a command needs: config, the restored session and a client
/// routed through it.
pub struct Context {
    config: Config,
    session: Session,
    client: ApiClient,
}

impl Context {
    pub fn open(config: Config, api_url: Option<String>) -> Result<Self> {
        let data_dir = config.data_dir()?;
        let storage: Arc<dyn KeyValueStore> =
            Arc::new(FileStore::open(&data_dir).context("Failed to open session storage")?);

        let transport = match api_url {
            Some(url) => ReqwestTransport::new(url, config.request_timeout())?,
            None => ReqwestTransport::from_config(&config)?,
        };
        debug!(base_url = transport.base_url(), "Using API");
        let transport: Arc<dyn HttpTransport> = Arc::new(transport);

        let session = Session::new(&config, Arc::clone(&transport), storage);
        session.restore();

        let client = ApiClient::new(transport);
        client.attach(&session);

        Ok(Self {
            config,
            session,
            client,
        })
    }

    pub async fn run(mut self, command: Command) -> Result<()> {
        match command {
            Command::Login(args) => self.login(args).await,
            Command::Register(args) => self.register(args).await,
            Command::Logout(args) => self.logout(args).await,
            Command::Whoami => self.whoami(),
            Command::Status => self.status(),
            Command::Get(args) => self.get(args).await,
            Command::Progress => self.progress().await,
            Command::Watch => self.watch().await,
        }
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    async fn login(&mut self, args: LoginArgs) -> Result<()> {
        let email = match args.email.or_else(|| self.config.last_email.clone()) {
            Some(email) => email,
            None => prompt_line("Email: ")?,
        };

        let saved = if CredentialStore::has_credentials(&email) {
            CredentialStore::get_password(&email).ok()
        } else {
            None
        };
        let password = match saved {
            Some(password) => {
                debug!("Using password from keychain");
                password
            }
            None => rpassword::prompt_password("Password: ")?,
        };

        let user = self
            .session
            .login(&email, &password)
            .await
            .map_err(|e| self.auth_failure(e))?;

        if args.remember {
            if let Err(e) = CredentialStore::store(&email, &password) {
                warn!(error = %e, "Failed to store credentials");
            }
        }

        self.config.last_email = Some(email);
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }

        println!("Logged in as {}", describe_user(&user));
        Ok(())
    }

    async fn register(&mut self, args: RegisterArgs) -> Result<()> {
        let password = rpassword::prompt_password("Password: ")?;
        let confirmation = rpassword::prompt_password("Confirm password: ")?;

        let user = self
            .session
            .register(&args.name, &args.email, &password, &confirmation)
            .await
            .map_err(|e| self.auth_failure(e))?;

        self.config.last_email = Some(args.email);
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }

        println!("Account created. Logged in as {}", describe_user(&user));
        Ok(())
    }

    async fn logout(&self, args: LogoutArgs) -> Result<()> {
        let was_logged_in = self.session.is_authenticated();
        self.session.logout().await;

        if args.forget {
            if let Some(email) = &self.config.last_email {
                if let Err(e) = CredentialStore::delete(email) {
                    warn!(error = %e, "Failed to delete saved password");
                }
            }
        }

        if was_logged_in {
            println!("Logged out");
        } else {
            println!("Not logged in");
        }
        Ok(())
    }

    /// Prefer the message the session published for the user
    fn auth_failure(&self, e: ApiError) -> anyhow::Error {
        match self.session.error() {
            Some(message) => anyhow!(message),
            None => e.into(),
        }
    }

    // =========================================================================
    // Session info
    // =========================================================================

    fn whoami(&self) -> Result<()> {
        match self.session.user() {
            Some(user) => println!("{}", describe_user(&user)),
            None => println!("Not logged in"),
        }
        Ok(())
    }

    fn status(&self) -> Result<()> {
        let Some(credential) = self.session.token_store().credential() else {
            println!("Not logged in");
            return Ok(());
        };

        println!("User:     {}", describe_user(&credential.user));
        println!("Token:    {}", truncate_string(&credential.token, 12));
        println!(
            "Expires:  {} ({})",
            format_date(&credential.expires_at),
            format_remaining(credential.time_until_expiry())
        );
        if credential.needs_refresh() {
            println!("          renewal due on next check");
        }
        if let Some(warning) = expiry_warning(self.session.expiry_notice()) {
            println!("Warning:  {}", warning);
        }

        let progress = self.session.progress();
        match progress.age(credential.user.id, PROGRESS_CACHE) {
            Some(age) => println!("Progress: cached {}", age),
            None => println!("Progress: not cached"),
        }
        Ok(())
    }

    // =========================================================================
    // API access
    // =========================================================================

    async fn get(&self, args: GetArgs) -> Result<()> {
        let data: Value = self.client.get(&args.path).await?;
        println!("{}", serde_json::to_string_pretty(&data)?);
        Ok(())
    }

    async fn progress(&self) -> Result<()> {
        let Some(user) = self.session.user() else {
            bail!("Not logged in");
        };
        let cache: ProgressCache = self.session.progress();

        match self.client.get::<Value>(PROGRESS_PATH).await {
            Ok(data) => {
                if let Err(e) = cache.save(user.id, PROGRESS_CACHE, &data) {
                    warn!(error = %e, "Failed to cache progress");
                }
                println!("{}", serde_json::to_string_pretty(&data)?);
                Ok(())
            }
            Err(e) if e.is_network() => {
                let Some(cached) = cache.load::<Value>(user.id, PROGRESS_CACHE)? else {
                    return Err(e.into());
                };
                eprintln!("Offline, showing progress cached {}", cached.age_display());
                println!("{}", serde_json::to_string_pretty(&cached.data)?);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn watch(&self) -> Result<()> {
        if !self.session.is_authenticated() {
            bail!("Not logged in");
        }
        let mut updates = self.session.subscribe();
        print_state(&updates.borrow_and_update());
        println!("Watching session, Ctrl-C to stop");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = updates.borrow_and_update().clone();
                    print_state(&state);
                    if state.user.is_none() {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

fn describe_user(user: &User) -> String {
    format!("{} <{}>", user.name, user.email)
}

/// A one-shot command has no input history to judge activity from, so the
/// warning ignores `suppressed` and shows whenever the window is reached.
fn expiry_warning(notice: Option<ExpiryNotice>) -> Option<String> {
    let notice = notice?;
    Some(format!("session expires in {}", format_remaining(notice.remaining)))
}

fn print_state(state: &SessionState) {
    match (&state.user, &state.error) {
        (Some(user), _) => println!("Session active: {}", describe_user(user)),
        (None, Some(error)) => println!("Session ended: {}", error),
        (None, None) => println!("Logged out"),
    }
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
