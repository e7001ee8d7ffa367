use dds_verify::{clean_logger, cli};

fn main() {
    let res = cli::run();
    clean_logger();
    match res {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            std::process::exit(cli::EXIT_FAILURE);
        }
    }
}
