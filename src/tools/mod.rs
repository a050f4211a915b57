//! Block-driven tools available to agents.
//!
//! - Shell: `bash` blocks run through `sh -c`
//! - File finder: `file_finder` blocks locate and read files
//! - Web search: `web_search` blocks query DuckDuckGo

pub mod file_finder;
pub mod shell;
pub mod web_search;

pub use file_finder::{FileFinderTool, FILE_FINDER_TAG};
pub use shell::{default_blocked_commands, ShellConfig, ShellTool, SHELL_TAG};
pub use web_search::{
    DuckDuckGoBackend, DuckDuckGoConfig, SearchBackend, SearchResult, WebSearchTool,
    WEB_SEARCH_TAG,
};
