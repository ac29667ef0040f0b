use std::process::ExitCode;

use tabula::{EditorConf, Site};

#[tokio::main]
async fn main() -> ExitCode {
    let conf = EditorConf::from_env();

    if let Err(e) = conf.validate() {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match Site::builder(conf).run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
