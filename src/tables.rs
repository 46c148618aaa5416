use serde::Serialize;
use serde_json::{Map, Value};

use crate::listing::{Page, Resource};
use crate::models::{Course, EducationGroup, Lecture, Student, Teacher};
use crate::urls;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Column {
    pub name: &'static str,
    pub header: &'static str,
    /// The cell links to the record's update page.
    pub link: bool,
}

const fn column(name: &'static str, header: &'static str) -> Column {
    Column {
        name,
        header,
        link: false,
    }
}

const fn linked(name: &'static str, header: &'static str) -> Column {
    Column {
        name,
        header,
        link: true,
    }
}

pub trait Tabular {
    const ICON: &'static str = "sitemap";
    const COLUMNS: &'static [Column];

    /// One value per entry of `COLUMNS`, in the same order.
    fn cells(&self) -> Vec<Value>;
}

/// `"1 Student"`, `"0 Students"`, `"5 Students"`.
pub fn caption(count: u64, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{} {}", count, singular)
    } else {
        format!("{} {}", count, plural)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RowLinks {
    pub update: String,
    pub delete: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Row {
    pub id: i64,
    pub cells: Map<String, Value>,
    pub links: RowLinks,
}

#[derive(Debug, Clone, Serialize)]
pub struct Table {
    pub caption: String,
    pub icon: &'static str,
    pub columns: &'static [Column],
    pub rows: Vec<Row>,
    pub page: Page,
}

impl Table {
    pub fn of<R: Resource>(records: &[R], page: Page) -> Table {
        let rows = records
            .iter()
            .map(|record| Row {
                id: record.id(),
                cells: R::COLUMNS
                    .iter()
                    .map(|c| c.name.to_string())
                    .zip(record.cells())
                    .collect(),
                links: RowLinks {
                    update: urls::update::<R>(record.id()),
                    delete: urls::delete::<R>(record.id()),
                },
            })
            .collect();
        Table {
            caption: caption(page.count, R::CAPTION.0, R::CAPTION.1),
            icon: R::ICON,
            columns: R::COLUMNS,
            rows,
            page,
        }
    }
}

impl Tabular for Student {
    const COLUMNS: &'static [Column] = &[
        linked("last_name", "Last name"),
        column("first_name", "First name"),
        column("user", "User"),
        column("birth_date", "Birth date"),
        column("active", "Status"),
    ];

    fn cells(&self) -> Vec<Value> {
        vec![
            self.last_name.clone().into(),
            self.first_name.clone().into(),
            self.user_label.clone().into(),
            self.birth_date.to_string().into(),
            self.active.into(),
        ]
    }
}

impl Tabular for EducationGroup {
    const COLUMNS: &'static [Column] = &[
        linked("name", "Name"),
        column("description", "Description"),
    ];

    fn cells(&self) -> Vec<Value> {
        vec![self.name.clone().into(), self.description.clone().into()]
    }
}

impl Tabular for Teacher {
    const COLUMNS: &'static [Column] = &[
        linked("last_name", "Last name"),
        column("first_name", "First name"),
        column("user", "User"),
        column("birth_date", "Birth date"),
        column("active", "Status"),
    ];

    fn cells(&self) -> Vec<Value> {
        vec![
            self.last_name.clone().into(),
            self.first_name.clone().into(),
            self.user_label.clone().into(),
            self.birth_date.to_string().into(),
            self.active.into(),
        ]
    }
}

impl Tabular for Course {
    const COLUMNS: &'static [Column] = &[
        linked("title", "Title"),
        column("description", "Description"),
    ];

    fn cells(&self) -> Vec<Value> {
        vec![self.title.clone().into(), self.description.clone().into()]
    }
}

impl Tabular for Lecture {
    const COLUMNS: &'static [Column] = &[
        linked("title", "Title"),
        column("course", "Course"),
        column("start", "Start"),
        column("finish", "Finish"),
    ];

    fn cells(&self) -> Vec<Value> {
        vec![
            self.title.clone().into(),
            self.course_title.clone().into(),
            self.start.to_rfc3339().into(),
            self.finish.to_rfc3339().into(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::PageRequest;
    use chrono::NaiveDate;

    #[test]
    fn caption_is_singular_only_for_one() {
        assert_eq!(caption(1, "Student", "Students"), "1 Student");
        assert_eq!(caption(0, "Student", "Students"), "0 Students");
        assert_eq!(caption(5, "Student", "Students"), "5 Students");
    }

    #[test]
    fn rows_carry_cells_and_links() {
        let students = vec![Student {
            id: 7,
            user_id: None,
            user_label: None,
            last_name: "Smith".into(),
            first_name: "John".into(),
            birth_date: NaiveDate::from_ymd_opt(2001, 1, 2).unwrap(),
            active: true,
            group_ids: vec![],
        }];
        let page = PageRequest {
            number: 1,
            per_page: 25,
        }
        .resolve(1)
        .unwrap();
        let table = Table::of(&students, page);
        assert_eq!(table.caption, "1 Student");
        let row = &table.rows[0];
        assert_eq!(row.cells["last_name"], "Smith");
        assert_eq!(row.cells["user"], Value::Null);
        assert_eq!(row.cells["birth_date"], "2001-01-02");
        assert_eq!(row.links.update, "/dashboard/education/students/7/update/");
        assert_eq!(row.links.delete, "/dashboard/education/students/7/delete/");
    }
}
