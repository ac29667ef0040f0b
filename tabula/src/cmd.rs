use argh::FromArgs;

#[derive(FromArgs, PartialEq, Eq, Debug, Clone)]
/// Spreadsheet-style editor for the tables of one schema
pub struct EditorCommand {
    #[argh(subcommand)]
    pub nested: NestedCommand,

    #[argh(switch, short = 'v', long = "verbose")]
    /// enable verbose output
    pub verbose: bool,
}

#[derive(FromArgs, PartialEq, Eq, Debug, Clone)]
#[argh(subcommand)]
pub enum NestedCommand {
    Serve(ServeCommand),
    Tables(TablesCommand),
}

#[derive(FromArgs, PartialEq, Eq, Debug, Clone)]
#[argh(subcommand, name = "serve")]
/// Serve the editor
pub struct ServeCommand {
    #[argh(option)]
    /// host to bind the server to (overrides HOST)
    pub host: Option<String>,

    #[argh(option)]
    /// port to bind the server to (overrides PORT)
    pub port: Option<u16>,
}

#[derive(FromArgs, PartialEq, Eq, Debug, Clone)]
#[argh(subcommand, name = "tables")]
/// List the tables of the configured schema and their primary keys
pub struct TablesCommand {}
