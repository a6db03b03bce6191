use std::{env, fs, process::ExitCode};

use quill::{disassemble, Script, StdIo, Vm};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("run") => with_script(&args[2..], |script| {
            let mut io = StdIo::new();
            let mut vm = Vm::new(&mut io);
            match vm.run(script) {
                Ok(_) => ExitCode::SUCCESS,
                Err(err) => {
                    eprintln!("ERROR: {err}");
                    ExitCode::FAILURE
                }
            }
        }),
        Some("dump") => with_script(&args[2..], |script| {
            print!("{}", disassemble(script));
            ExitCode::SUCCESS
        }),
        _ => {
            eprintln!("usage: quill <run|dump> <file.qvm>");
            ExitCode::FAILURE
        }
    }
}

/// Loads the script named by the first argument and hands it to `f`.
fn with_script(args: &[String], f: impl FnOnce(&Script) -> ExitCode) -> ExitCode {
    let Some(path) = args.first() else {
        eprintln!("usage: quill <run|dump> <file.qvm>");
        return ExitCode::FAILURE;
    };
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("error: cannot read {path}: {err}");
            return ExitCode::FAILURE;
        }
    };
    match Script::load(&bytes) {
        Ok(script) => f(&script),
        Err(err) => {
            eprintln!("error: cannot decode {path}: {err}");
            ExitCode::FAILURE
        }
    }
}
