pub mod bugreport;
pub mod files;
pub mod history;
pub mod server;
pub mod upload;
pub mod version;

pub const SERVER_SUBCOMMAND: &str = "server";
pub const SERVER_DESCRIPTION: &str = "Run the server, configured by FILEDECK_* environment variables";

pub const VERSION_SUBCOMMAND: &str = "version";
pub const VERSION_DESCRIPTION: &str = "Display the version and build information";

pub const BUGREPORT_SUBCOMMAND: &str = "bugreport";
pub const BUGREPORT_DESCRIPTION: &str = "Collect information about the system and the environment for a bug report";

pub const UPLOAD_SUBCOMMAND: &str = "upload";
pub const UPLOAD_DESCRIPTION: &str = "Upload file(s), large ones through resumable sessions";

pub const LIST_SUBCOMMAND: &str = "list";
pub const LIST_DESCRIPTION: &str = "List bucket contents";

pub const FOLDERS_SUBCOMMAND: &str = "folders";
pub const FOLDERS_DESCRIPTION: &str = "List folders";

pub const FILES_SUBCOMMAND: &str = "files";
pub const FILES_DESCRIPTION: &str = "List files under a prefix";

pub const DELETE_SUBCOMMAND: &str = "delete";
pub const DELETE_DESCRIPTION: &str = "Delete an object";

pub const LINK_SUBCOMMAND: &str = "link";
pub const LINK_DESCRIPTION: &str = "Print a download link for an object";

pub const CONFIG_SUBCOMMAND: &str = "config";
pub const CONFIG_DESCRIPTION: &str = "Show which backend and bucket the server uses";

pub const HISTORY_SUBCOMMAND: &str = "history";
pub const HISTORY_DESCRIPTION: &str = "Show or clean the local upload history";

pub const UNFINISHED_SUBCOMMAND: &str = "unfinished";
pub const UNFINISHED_DESCRIPTION: &str = "Show uploads that never finished";

pub const CLEAR_SUBCOMMAND: &str = "clear";
pub const CLEAR_DESCRIPTION: &str = "Forget the whole history";

pub const DISCARD_SUBCOMMAND: &str = "discard";
pub const DISCARD_DESCRIPTION: &str = "Forget uploads that never finished";

pub const DEFAULT_HISTORY_FILE: &str = ".filedeck-history.json";
