//! Terminal rendering of the tree, the selection and assertion content.

use crossterm::style::{StyledContent, Stylize};
use iview_engine::{FetchState, Viewer};
use iview_types::{DisplayContent, Fragment, Highlight, Markup, Status};

pub fn status_label(status: Status) -> StyledContent<&'static str> {
    let label = status.as_str();
    match status {
        Status::Passed | Status::XPass => label.green(),
        Status::Failed | Status::Error | Status::XPassStrict => label.red(),
        Status::Running | Status::Waiting | Status::Resetting => label.yellow(),
        Status::Skipped | Status::XFail | Status::Incomplete | Status::Unstable => label.dark_yellow(),
        Status::Ready | Status::Unknown => label.dark_grey(),
    }
}

pub fn print_tree(viewer: &Viewer) {
    let tree = viewer.tree();
    for (path, node) in tree.depth_first() {
        let indent = "  ".repeat(path.depth());
        let record = node.record();
        let marker = match viewer.fetch_state(&path) {
            FetchState::Failed(_) => " (fetch failed)".red().to_string(),
            FetchState::InFlight => " (loading)".dark_grey().to_string(),
            _ if !node.is_fetched() && node.may_have_children() => " …".dark_grey().to_string(),
            _ => String::new(),
        };
        println!(
            "{indent}{} {} [{}]{marker}",
            record.name,
            format!("({})", record.uid).dark_grey(),
            status_label(record.display_status()),
        );
    }
}

pub fn print_selection(viewer: &Viewer, contents: &[DisplayContent]) {
    let selection = viewer.selection();
    let breadcrumb: Vec<String> = selection
        .entries()
        .iter()
        .map(|entry| format!("{} ({})", entry.uid, entry.category))
        .collect();
    println!("{}", breadcrumb.join(" > ").bold());

    let tree = viewer.tree();
    let Some(path) = selection.node_path() else {
        return;
    };
    if let Some(children) = tree.children(&path) {
        for child in children {
            println!(
                "  {} [{}]",
                child.record().name,
                status_label(child.record().display_status())
            );
        }
    }
    for (index, content) in contents.iter().enumerate() {
        println!();
        println!("{}", format!("#{}", index + 1).bold());
        print_content(content);
    }
}

fn print_content(content: &DisplayContent) {
    print_slot(None, content.pre_title.as_ref(), content.pre_content.as_ref());
    print_slot(content.left_title.as_ref(), None, content.left_content.as_ref());
    print_slot(content.right_title.as_ref(), None, content.right_content.as_ref());
    print_slot(content.post_title.as_ref(), None, content.post_content.as_ref());
}

fn print_slot(title: Option<&Markup>, heading: Option<&Markup>, body: Option<&Markup>) {
    let heading = title.or(heading);
    match (heading, body) {
        (Some(heading), Some(body)) => println!("  {} {}", terminal_text(heading).bold(), terminal_text(body)),
        (Some(heading), None) => println!("  {}", terminal_text(heading).bold()),
        (None, Some(body)) if !body.is_empty() => println!("  {}", terminal_text(body)),
        _ => {}
    }
}

fn terminal_text(markup: &Markup) -> String {
    let mut out = String::new();
    for fragment in markup.fragments() {
        match fragment {
            Fragment::Text { text, highlight } => {
                let styled = match highlight {
                    Highlight::Plain => text.clone().stylize(),
                    Highlight::Match => text.clone().green(),
                    Highlight::Mismatch => text.clone().red(),
                    Highlight::Skipped => text.clone().dark_grey(),
                };
                out.push_str(&styled.to_string());
            }
            Fragment::Link { href } => out.push_str(&href.clone().underlined().to_string()),
            Fragment::Line { text } => {
                out.push('\n');
                out.push_str("    ");
                out.push_str(text);
            }
            Fragment::Preformatted { text } => {
                out.push('\n');
                out.push_str(text);
            }
        }
    }
    out
}
