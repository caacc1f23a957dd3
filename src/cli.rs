use clap::{Parser, Subcommand, ValueEnum};

use loanzaar::models::record::RecordKind;

/// LoanZaar: review and approval service for staged loan, insurance and support submissions
#[derive(Parser)]
#[command(name = "loanzaar", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to LOANZAAR_PORT or 5000)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Apply database migrations and exit
    Migrate,

    /// Issue an internal admin JWT
    AdminToken {
        /// User id to embed (defaults to a fresh UUID)
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "admin")]
        role: String,
        /// Lifetime in hours
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },

    /// Manage system-of-record users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Review staged submissions from the terminal
    Review {
        #[command(subcommand)]
        command: ReviewCommands,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Register a user mapped to a Firebase uid
    Add {
        #[arg(long)]
        external_id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// Grant the admin role
        #[arg(long)]
        admin: bool,
    },
    /// List users
    List,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum KindArg {
    Loan,
    Insurance,
    Ticket,
}

impl From<KindArg> for RecordKind {
    fn from(k: KindArg) -> Self {
        match k {
            KindArg::Loan => RecordKind::Loan,
            KindArg::Insurance => RecordKind::Insurance,
            KindArg::Ticket => RecordKind::Ticket,
        }
    }
}

#[derive(Subcommand)]
pub enum ReviewCommands {
    /// List pending submissions
    Pending {
        #[arg(long = "type", value_enum)]
        kind: Option<KindArg>,
    },
    /// Show pending counts per kind
    Stats,
    /// Approve a submission and migrate it into the system of record
    Approve {
        #[arg(long = "type", value_enum)]
        kind: KindArg,
        doc_id: String,
        #[arg(long)]
        notes: Option<String>,
        /// Ticket priority: low, medium or high
        #[arg(long)]
        priority: Option<String>,
    },
    /// Reject a submission
    Reject {
        #[arg(long = "type", value_enum)]
        kind: KindArg,
        doc_id: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Set the staging status (pending, processing, rejected)
    Status { doc_id: String, status: String },
}
