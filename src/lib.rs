// Library root
// -----------
// The `gist` binary is a thin wrapper around these modules, which keeps
// the whole pipeline callable (and testable) without a process boundary.
//
// Module responsibilities:
// - `cli`: Flag parsing, run-time settings and the linear pipeline that
//   ties the other modules together.
// - `files`: Reads the input files (or standard input) into memory.
// - `auth`: Locates and validates the personal access token.
// - `api`: Talks to the GitHub REST API to create the gist.
pub mod api;
pub mod auth;
pub mod cli;
pub mod files;
