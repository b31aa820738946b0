use std::fmt::Write;

use crate::models::{ChangeRecord, ClassChanges, Status};

/// Human-readable campus name for the email headings.
pub fn campus_display_name(code: &str) -> String {
    match code.to_ascii_lowercase().as_str() {
        "da" => "De Anza".to_string(),
        "fh" => "Foothill".to_string(),
        _ => code.to_uppercase(),
    }
}

/// One class's section of the email: display name, CRN, and the sentences
/// describing what changed.
#[derive(Debug, PartialEq)]
pub struct FormattedClass {
    pub name: String,
    pub title: String,
    pub crn: String,
    pub lines: Vec<String>,
}

impl FormattedClass {
    /// Section heading for this class. The title is upstream metadata and
    /// can be missing.
    fn heading(&self) -> String {
        if self.title.is_empty() {
            format!("{} (CRN {})", self.name, self.crn)
        } else {
            format!("{}: {} (CRN {})", self.name, self.title, self.crn)
        }
    }
}

/// Turn a class's change set into the sentences shown in the email.
///
/// Special case: a new seat together with a fresh waitlist seat and a status
/// change to open means someone is about to move off the waitlist, so the
/// whole set collapses into one more specific sentence instead of
/// enumerating each raw change.
pub fn format_class(class: &ClassChanges) -> FormattedClass {
    let name = format!("{} {}", class.department, class.course).to_uppercase();

    let seats_opened = class.changes.iter().find_map(|change| match change {
        ChangeRecord::Seats { updated, .. } if *updated > 0 => Some(*updated),
        _ => None,
    });
    let waitlist_opened = class.changes.iter().any(|change| {
        matches!(change, ChangeRecord::WaitlistSeats { updated, .. } if *updated > 0)
    });
    let now_open = class.changes.iter().any(|change| {
        matches!(
            change,
            ChangeRecord::Status {
                updated: Status::Open,
                ..
            }
        )
    });

    if let (Some(seats), true, true) = (seats_opened, waitlist_opened, now_open) {
        let line = if seats == 1 {
            "1 seat is about to open up in the waitlist (within the next hour).".to_string()
        } else {
            format!("{seats} seats are about to open up in the waitlist (within the next hour).")
        };
        return FormattedClass {
            name,
            title: class.title.clone(),
            crn: class.class.crn.clone(),
            lines: vec![line],
        };
    }

    let lines = class
        .changes
        .iter()
        .map(|change| match change {
            ChangeRecord::Seats { previous, updated } => {
                if *updated == 1 {
                    format!("There is 1 seat available (was {previous})")
                } else {
                    format!("There are {updated} seats available (was {previous})")
                }
            }
            ChangeRecord::WaitlistSeats { previous, updated } => {
                if *updated == 1 {
                    format!("There is 1 waitlist seat available (was {previous})")
                } else {
                    format!("There are {updated} waitlist seats available (was {previous})")
                }
            }
            ChangeRecord::Status { previous, updated } => {
                format!("Class status is now {updated} (was {previous}).")
            }
        })
        .collect();

    FormattedClass {
        name,
        title: class.title.clone(),
        crn: class.class.crn.clone(),
        lines,
    }
}

/// Group a user's changed classes by campus, keeping first-seen order.
pub fn group_by_campus(classes: &[ClassChanges]) -> Vec<(String, Vec<FormattedClass>)> {
    let mut groups: Vec<(String, Vec<FormattedClass>)> = Vec::new();
    for class in classes {
        let formatted = format_class(class);
        match groups
            .iter_mut()
            .find(|(campus, _)| campus == &class.class.campus)
        {
            Some((_, items)) => items.push(formatted),
            None => groups.push((class.class.campus.clone(), vec![formatted])),
        }
    }
    groups
}

/// Render the consolidated email bodies for one user. Returns (html, text).
pub fn render_bodies(email: &str, classes: &[ClassChanges]) -> (String, String) {
    let groups = group_by_campus(classes);

    let mut html = String::new();
    let _ = write!(
        html,
        "<p>Hi {email},</p><p>Here are the latest updates about your classes:</p>"
    );
    for (campus, formatted) in &groups {
        let _ = write!(html, "<h2>{}</h2>", campus_display_name(campus));
        for class in formatted {
            let _ = write!(html, "<h3>{}</h3><ul>", class.heading());
            for line in &class.lines {
                let _ = write!(html, "<li>{line}</li>");
            }
            let _ = write!(html, "</ul>");
        }
    }
    let _ = write!(
        html,
        "<p>You are receiving this email because you registered for updates on classes.fyi.</p>"
    );

    let mut text = String::new();
    let _ = writeln!(text, "Hi {email},");
    let _ = writeln!(text);
    let _ = writeln!(text, "Here are the latest updates about your classes:");
    for (campus, formatted) in &groups {
        let _ = writeln!(text);
        let _ = writeln!(text, "{}:", campus_display_name(campus));
        for class in formatted {
            let _ = writeln!(text, "  {}", class.heading());
            for line in &class.lines {
                let _ = writeln!(text, "    - {line}");
            }
        }
    }
    let _ = writeln!(text);
    let _ = writeln!(
        text,
        "You are receiving this email because you registered for updates on classes.fyi."
    );

    (html, text)
}
