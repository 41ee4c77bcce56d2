//! CLI module - Command-line interface for TerrainTrack
//!
//! This module provides a structured CLI using clap for argument parsing.

mod commands;

use clap::{Parser, Subcommand};

/// TerrainTrack - access control service
/// Sessions, roles and two-factor authentication for the fleet application
#[derive(Parser)]
#[command(name = "terraintrack")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API
    #[command(alias = "web", alias = "daemon")]
    Serve,

    /// Create default config file
    Init,

    /// Create a user account
    CreateUser {
        /// Login email
        email: String,
        /// Display name
        #[arg(long)]
        name: String,
        /// Initial password
        #[arg(long)]
        password: String,
        /// Role names to assign (repeatable)
        #[arg(long = "role")]
        roles: Vec<String>,
        /// Mark the account as administrator (two-factor becomes mandatory)
        #[arg(long)]
        admin: bool,
    },

    /// Assign a role to an existing user
    AssignRole {
        /// User email
        email: String,
        /// Role name
        role: String,
    },

    /// List roles and their permissions
    #[command(alias = "roles")]
    ListRoles,

    /// List user accounts
    #[command(alias = "users")]
    ListUsers,
}

pub use commands::*;
