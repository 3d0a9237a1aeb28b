use std::{env, fs, process::ExitCode};

use weft::Engine;
use weft::ast::Program;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let Some(file_path) = args.get(1) else {
        eprintln!("usage: weft <program.json>");
        return ExitCode::FAILURE;
    };

    let source = match fs::read_to_string(file_path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: cannot read {file_path}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let program: Program = match serde_json::from_str(&source) {
        Ok(program) => program,
        Err(err) => {
            eprintln!("error: {file_path} is not a valid program: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut engine = Engine::new_in_memory();
    match engine.execute(&program) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{output}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
