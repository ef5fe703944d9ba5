use ambient_code_common::args::{BackendArgs, IdentityArgs, ImageArgs, IntegrationArgs, ObjectStoreArgs};
use clap::Parser;

/// Process-wide configuration, parsed once at startup (§6 "Configuration").
/// Every reconciler component receives this by reference rather than
/// reading `std::env::var` ad hoc — the sole exception is the
/// leader-election identity in `sessions::reconcile::run`, which must work
/// before argument parsing is guaranteed to have run.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct OperatorArgs {
    #[command(flatten)]
    pub backend: BackendArgs,

    #[command(flatten)]
    pub images: ImageArgs,

    #[command(flatten)]
    pub object_store: ObjectStoreArgs,

    #[command(flatten)]
    pub integrations: IntegrationArgs,

    #[command(flatten)]
    pub identity: IdentityArgs,

    #[cfg(feature = "metrics")]
    #[arg(long, env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,
}
