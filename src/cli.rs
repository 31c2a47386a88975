use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, bail};
use clap::{ArgAction, Parser, Subcommand};
use lexdraft::poller::{SystemClock, TokioAlarm};
use lexdraft::shared::{ArtifactFormat, JobStatus};
use lexdraft::{
    AccountService, ApiClient, AppRoute, AuthService, ClientConfig, CredentialStore,
    DocumentDraft, FakeTemplateBackend, FileStorage, HttpTemplateBackend, JobPoller, JobSnapshot,
    LogNavigator, PollOptions, PreviewRegistry, ProcessEnv, RedirectGuard, ReqwestHttpClient,
    TemplateBackend,
};

#[derive(Parser, Debug)]
#[command(name = "lexdraft")]
#[command(about = "Generate legal documents from templates")]
#[command(
    after_help = "Environment:\n  LEXDRAFT_API_BASE_URL      API root\n  LEXDRAFT_CREDENTIALS_PATH  Credential file\n  RUST_LOG                   Log filter"
)]
pub struct Cli {
    /// -v for debug, -vv for trace
    #[arg(long, short, global = true, action = ArgAction::Count)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Create an account (does not sign in)
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        full_name: Option<String>,
    },
    Logout,
    /// Show the cached user
    Whoami,
    /// Show the profile, or update the full name
    Profile {
        #[arg(long)]
        full_name: Option<String>,
    },
    Password {
        #[arg(long)]
        current: String,
        #[arg(long)]
        new: String,
    },
    Subscription,
    Balance,
    /// Request a subscription payment link
    Renew {
        #[arg(long)]
        plan: Option<String>,
    },
    /// Request a top-up payment link
    Topup { units: u32 },
    /// Run a template and download the result
    Generate {
        /// Template code, e.g. `lawsuit`
        code: String,
        #[arg(long = "file", short = 'f')]
        files: Vec<PathBuf>,
        #[arg(long, short = 'i')]
        instruction: Option<String>,
        #[arg(long, value_delimiter = ',', default_value = "pdf")]
        format: Vec<ArtifactFormat>,
        #[arg(long, default_value = ".")]
        out: PathBuf,
        /// Use the in-memory backend instead of the API
        #[arg(long, default_value_t = false)]
        fake: bool,
    },
}

impl Command {
    /// Screen the command stands in for; `None` for commands any session
    /// may run.
    fn route(&self) -> Option<AppRoute> {
        match self {
            Command::Login { .. } => Some(AppRoute::Login),
            Command::Register { .. } => Some(AppRoute::Register),
            Command::Profile { .. }
            | Command::Password { .. }
            | Command::Subscription
            | Command::Balance
            | Command::Renew { .. }
            | Command::Topup { .. } => Some(AppRoute::Account),
            Command::Generate { code, .. } => Some(AppRoute::TemplateEditor(code.clone())),
            Command::Logout | Command::Whoami => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Access {
    Allowed,
    NeedsLogin,
    AlreadySignedIn,
}

/// 路由守卫
fn access(route: &AppRoute, authenticated: bool) -> Access {
    if route.requires_auth() && !authenticated {
        Access::NeedsLogin
    } else if route.should_redirect_when_authenticated() && authenticated {
        Access::AlreadySignedIn
    } else {
        Access::Allowed
    }
}

type Api = ApiClient<ReqwestHttpClient, FileStorage>;

fn connect(config: &ClientConfig) -> anyhow::Result<Rc<Api>> {
    let http = ReqwestHttpClient::new(config.request_timeout)?;
    let storage = FileStorage::open(&config.credentials_path)
        .with_context(|| format!("opening {}", config.credentials_path.display()))?;
    Ok(Rc::new(ApiClient::new(
        http,
        &config.api_base_url,
        Rc::new(CredentialStore::new(storage)),
        Rc::new(RedirectGuard::new(LogNavigator)),
    )))
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ClientConfig::from_env(&ProcessEnv)?;
    tracing::debug!(api = %config.api_base_url, "configuration loaded");

    // fake 模式不需要网络与凭证
    if let Command::Generate {
        code,
        files,
        instruction,
        format,
        out,
        fake: true,
    } = &cli.command
    {
        let backend = FakeTemplateBackend::new(SystemClock);
        return generate(backend, code, files, instruction.as_deref(), format, out, &config.poll)
            .await;
    }

    let api = connect(&config)?;
    let auth = AuthService::new(api.clone());
    let account = AccountService::new(api.clone());

    if let Some(route) = cli.command.route() {
        match access(&route, auth.is_authenticated()) {
            Access::NeedsLogin => {
                bail!("{} requires a session, run `lexdraft login` first", route)
            }
            Access::AlreadySignedIn => {
                println!("Already signed in, run `lexdraft logout` first");
                return Ok(());
            }
            Access::Allowed => {}
        }
    }

    match cli.command {
        Command::Login { email, password } => {
            let session = auth.sign_in(&email, &password).await?;
            println!("Signed in as {}", session.user.email);
        }
        Command::Register {
            email,
            password,
            full_name,
        } => {
            auth.sign_up(&email, &password, full_name.as_deref()).await?;
            println!("Account created, sign in with `lexdraft login`");
        }
        Command::Logout => {
            auth.sign_out().await?;
            println!("Signed out");
        }
        Command::Whoami => match auth.current_user() {
            Some(user) => {
                println!("{}", user.email);
                if let Some(name) = user.full_name {
                    println!("{}", name);
                }
            }
            None => println!("Not signed in"),
        },
        Command::Profile { full_name } => {
            let profile = match full_name {
                Some(name) => account.update_profile(&name).await?,
                None => account.profile().await?,
            };
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        Command::Password { current, new } => {
            account.change_password(&current, &new).await?;
            println!("Password changed");
        }
        Command::Subscription => {
            let sub = account.subscription().await?;
            println!("{}", serde_json::to_string_pretty(&sub)?);
            let next = account.next_billing().await?;
            println!(
                "Next debit: {} ({} {})",
                next.next_billing_date.format("%Y-%m-%d"),
                next.amount,
                next.currency
            );
        }
        Command::Balance => {
            let balance = account.balance().await?;
            println!("{} units", balance.balance_units);
        }
        Command::Renew { plan } => {
            let link = account.create_subscription_link(plan.as_deref()).await?;
            println!("{}", link.payment_url);
        }
        Command::Topup { units } => {
            let link = account.create_topup_link(units).await?;
            println!("{}", link.payment_url);
        }
        Command::Generate {
            code,
            files,
            instruction,
            format,
            out,
            fake: _,
        } => {
            let backend = HttpTemplateBackend::new(api.clone());
            generate(backend, &code, &files, instruction.as_deref(), &format, &out, &config.poll)
                .await?;
        }
    }
    Ok(())
}

// =========================================================
// generate
// =========================================================

async fn generate<B: TemplateBackend>(
    backend: B,
    code: &str,
    files: &[PathBuf],
    instruction: Option<&str>,
    formats: &[ArtifactFormat],
    out: &Path,
    options: &PollOptions,
) -> anyhow::Result<()> {
    let mut draft = DocumentDraft::new(code, Rc::new(PreviewRegistry::new()));
    for path in files {
        draft.add_path(path)?;
    }
    if let Some(instruction) = instruction {
        draft.set_instruction(instruction);
    }
    let params = draft.to_params()?;

    let poller = JobPoller::new(backend, TokioAlarm::new(), SystemClock, options.clone())
        .with_listener(print_progress);
    let job_id = poller.submit(code, &params).await?;
    eprintln!("Job {} submitted", job_id);

    let snapshot = tokio::select! {
        snapshot = poller.run() => snapshot,
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for Ctrl-C")?;
            poller.cancel().await?;
            bail!("cancelled");
        }
    };
    let Some(snapshot) = snapshot else {
        bail!("polling was cancelled");
    };
    snapshot.into_result()?;

    std::fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    for format in formats {
        let artifact = poller.download(&job_id, *format).await?;
        let path = artifact.save_to(out)?;
        println!("{}", path.display());
    }
    Ok(())
}

fn print_progress(snapshot: &JobSnapshot) {
    match (snapshot.status, snapshot.progress) {
        (JobStatus::Processing, Some(p)) => {
            eprintln!("{} {:>3}%", snapshot.status, (p * 100.0).round() as u32)
        }
        (status, _) => eprintln!("{}", status),
    }
}
