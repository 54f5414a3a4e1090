// Integration test utilities and fixture management for Atlas.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use atlas_core::cluster::{ClusterEngine, ClusterReport};
use atlas_core::config::AtlasConfig;
use atlas_core::context::{ContextPack, ContextSelector, Focus, TaskType};
use atlas_core::error::Result;
use atlas_core::ingest::{IngestionPipeline, IngestionReport};
use atlas_core::query::{QueryEngine, QueryRequest, QueryResponse};
use atlas_core::store::{GraphStore, SqliteStore};
use atlas_core::types::IngestMode;
use tokio_util::sync::CancellationToken;

/// A test fixture with a temporary git repository.
#[derive(Debug)]
pub struct TestRepo {
    pub dir: tempfile::TempDir,
}

const USER: &str = "pub struct User {\n    name: String,\n}\n\npub fn find_user(name: &str) -> User {\n    User { name: name.to_string() }\n}\n\npub fn user_name(user: &User) -> String {\n    user.name.clone()\n}\n";

const USER_STORE: &str = "pub struct UserStore {\n    users: Vec<User>,\n}\n\npub fn load_users(store: &UserStore) -> Vec<User> {\n    store.users.iter().map(|u| find_user(&user_name(u))).collect()\n}\n\npub fn save_user(store: &mut UserStore, user: User) {\n    store.users.push(user);\n}\n";

const SESSION: &str = "pub struct Session {\n    user: User,\n    token: String,\n}\n\npub fn open_session(user: &User) -> Session {\n    Session { user: find_user(&user_name(user)), token: String::new() }\n}\n\npub fn close_session(session: Session) {\n    drop(session);\n}\n\nfn session_token(session: &Session) -> String {\n    session.token.clone()\n}\n";

const LOGIN: &str = "pub fn login(name: &str) -> Session {\n    let user = find_user(name);\n    open_session(&user)\n}\n\npub fn logout(session: Session) {\n    close_session(session);\n}\n";

const INVOICE: &str = "pub struct Invoice {\n    user: User,\n    amount: u64,\n}\n\npub fn create_invoice(user: &User, amount: u64) -> Invoice {\n    Invoice { user: find_user(&user_name(user)), amount }\n}\n\npub fn invoice_total(invoice: &Invoice) -> u64 {\n    invoice.amount\n}\n";

const PAYMENT: &str = "pub struct Payment {\n    invoice: Invoice,\n}\n\npub fn charge(invoice: Invoice) -> Payment {\n    Payment { invoice }\n}\n\npub fn refund(payment: Payment) -> Invoice {\n    payment.invoice\n}\n";

const SUMMARY: &str = "pub fn monthly_summary(invoices: &[Invoice]) -> u64 {\n    invoices.iter().map(invoice_total).sum()\n}\n\npub fn yearly_summary(invoices: &[Invoice]) -> u64 {\n    monthly_summary(invoices) * 12\n}\n";

const BROKEN_SUMMARY: &str = "pub fn monthly_summary(invoices: &[Invoice]) -> u64 {\n    let total = ;\n    total\n}\n\npub fn yearly_summary(invoices: &[Invoice]) -> u64 {\n    monthly_summary(invoices) * 12\n}\n";

const SETTINGS: &str = "pub struct Settings {\n    currency: String,\n}\n\npub fn load_settings() -> Settings {\n    Settings { currency: String::from(\"EUR\") }\n}\n";

const MAIN: &str = "fn main() {\n    let settings = load_settings();\n    let session = login(\"admin\");\n    let invoice = create_invoice(&find_user(\"admin\"), 10);\n    let payment = charge(invoice);\n    logout(session);\n    drop((settings, payment));\n}\n";

const LOGIN_TEST: &str = "#[test]\nfn login_works() {\n    let session = login(\"x\");\n    logout(session);\n}\n";

impl TestRepo {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A ten-file Rust service (users, auth, billing, reporting) with git history
    /// in which the auth files and the billing files change together.
    pub fn service() -> Self {
        Self::build_service(SUMMARY)
    }

    /// [`service`](Self::service) with a syntax error in the reporting module.
    pub fn service_with_broken_file() -> Self {
        Self::build_service(BROKEN_SUMMARY)
    }

    fn build_service(summary: &str) -> Self {
        let dir = tempfile::tempdir().expect("create tempdir");
        let root = dir.path();

        git(root, &["init"]);
        git(root, &["config", "user.email", "test@atlas.dev"]);
        git(root, &["config", "user.name", "Test"]);

        // Commit 1: initial layout
        write_file(root, "src/users/user.rs", USER);
        write_file(root, "src/users/store.rs", USER_STORE);
        write_file(root, "src/auth/session.rs", SESSION);
        write_file(root, "src/auth/login.rs", LOGIN);
        write_file(root, "src/billing/invoice.rs", INVOICE);
        write_file(root, "src/billing/payment.rs", PAYMENT);
        write_file(root, "src/report/summary.rs", summary);
        write_file(root, "src/settings.rs", SETTINGS);
        write_file(root, "src/main.rs", MAIN);
        write_file(root, "tests/login_test.rs", LOGIN_TEST);
        git(root, &["add", "."]);
        git(root, &["commit", "-m", "Initial service"]);

        // Commit 2: auth change
        write_file(root, "src/auth/session.rs", &format!("{SESSION}\n// session expiry\n"));
        write_file(root, "src/auth/login.rs", &format!("{LOGIN}\n// rate limit\n"));
        git(root, &["add", "."]);
        git(root, &["commit", "-m", "Expire sessions"]);

        // Commit 3: billing change
        write_file(root, "src/billing/invoice.rs", &format!("{INVOICE}\n// tax\n"));
        write_file(root, "src/billing/payment.rs", &format!("{PAYMENT}\n// tax\n"));
        git(root, &["add", "."]);
        git(root, &["commit", "-m", "Add tax"]);

        // Commit 4: auth change again
        write_file(root, "src/auth/session.rs", &format!("{SESSION}\n// session expiry v2\n"));
        write_file(root, "src/auth/login.rs", &format!("{LOGIN}\n// rate limit v2\n"));
        git(root, &["add", "."]);
        git(root, &["commit", "-m", "Tune session expiry"]);

        Self { dir }
    }

    /// Overwrite a file in the working tree without committing.
    pub fn write(&self, rel: &str, content: &str) {
        write_file(self.path(), rel, content);
    }
}

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_DATE", "2025-01-15T10:00:00+00:00")
        .env("GIT_COMMITTER_DATE", "2025-01-15T10:00:00+00:00")
        .output()
        .unwrap_or_else(|e| panic!("git {}: {e}", args.join(" ")));
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!("git {} failed: {stderr}", args.join(" "));
    }
}

fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

// ── Harness ────────────────────────────────────────────────────────

/// An in-memory store plus the engines that read and write it.
pub struct Harness {
    pub store: Arc<SqliteStore>,
    pub config: AtlasConfig,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness").finish_non_exhaustive()
    }
}

impl Harness {
    pub fn new(config: AtlasConfig) -> Self {
        Self {
            store: Arc::new(SqliteStore::in_memory().expect("open in-memory store")),
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> Arc<dyn GraphStore> {
        Arc::clone(&self.store) as Arc<dyn GraphStore>
    }

    pub async fn ingest(&self, root: &Path, mode: IngestMode) -> Result<IngestionReport> {
        IngestionPipeline::new(self.store(), self.config.clone())
            .ingest(root, mode, &self.cancel)
            .await
    }

    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        QueryEngine::new(self.store(), self.config.query.clone())
            .run(request, &self.cancel)
            .await
    }

    pub async fn cluster(&self) -> Result<ClusterReport> {
        ClusterEngine::new(self.store(), self.config.cluster.clone())
            .run(&self.cancel)
            .await
    }

    pub async fn context(
        &self,
        focus: &Focus,
        task: TaskType,
        budget: Option<u32>,
    ) -> Result<ContextPack> {
        ContextSelector::new(self.store(), self.config.context.clone())
            .select(focus, task, budget, &self.cancel)
            .await
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new(AtlasConfig::default())
    }
}

/// Ingest `root` with the default configuration and return the harness for inspection.
pub async fn ingest_fixture(root: &Path) -> (IngestionReport, Harness) {
    let harness = Harness::default();
    let report = harness
        .ingest(root, IngestMode::Full)
        .await
        .expect("ingest fixture");
    (report, harness)
}
