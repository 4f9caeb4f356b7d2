#![windows_subsystem = "windows"]

use eframe::egui;
use retouchr::app::RetouchrApp;

fn main() -> Result<(), eframe::Error> {
    // Session log is truncated per launch; init before anything can fail.
    retouchr::logger::init();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 800.0])
            .with_title("Retouchr"),
        ..Default::default()
    };

    eframe::run_native(
        "Retouchr",
        options,
        Box::new(|cc| Box::new(RetouchrApp::new(cc))),
    )
}
