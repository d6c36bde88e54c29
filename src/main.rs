// Entrypoint for the `luma` binary.
// Keeps `main` small: hand over to the UI layer and turn any error into a
// message on stderr plus a non-zero exit code.

fn main() {
    if let Err(err) = luma_cli::ui::run() {
        luma_cli::ui::report_error(&err);
        std::process::exit(1);
    }
}
