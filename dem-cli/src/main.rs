use clap::{Parser, Subcommand};

use crate::{catalog::CatalogCmd, info::Info, render::Render};

mod catalog;
mod controller;
mod coords;
mod info;
mod render;

#[derive(Parser)]
struct Options {
	#[clap(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	Render(Render),
	Catalog(CatalogCmd),
	Info(Info),
}

fn main() {
	env_logger::init();
	let opts: Options = Options::parse();
	let code = match opts.command {
		Command::Render(args) => render::run(args),
		Command::Catalog(args) => catalog::run(args),
		Command::Info(args) => info::run(args),
	};
	std::process::exit(code);
}
