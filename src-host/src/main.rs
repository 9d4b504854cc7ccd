fn main() {
    if let Err(error) = currency_widget_lib::run() {
        eprintln!("currency-widget: {error:#}");
        std::process::exit(1);
    }
}
