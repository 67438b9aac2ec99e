//! Category and tag persistence.
//!
//! Categories and tags have lifecycles independent of products. Deleting a
//! tag cascades to its `product_tags` rows; deleting a category detaches it
//! from products.

use crate::model::product::{CategoryId, Tag, TagId};
use crate::repo::product_repo::{RepoError, RepoResult};
use rusqlite::Connection;

/// Repository interface for categories and tags.
pub trait TaxonomyRepository {
    fn create_category(&self, category_name: &str) -> RepoResult<CategoryId>;
    /// Returns `false` when no category had this id.
    fn delete_category(&self, id: CategoryId) -> RepoResult<bool>;
    fn create_tag(&self, tag_name: &str) -> RepoResult<TagId>;
    /// Returns `false` when no tag had this id.
    fn delete_tag(&self, id: TagId) -> RepoResult<bool>;
    /// Returns every tag ordered by id.
    fn list_tags(&self) -> RepoResult<Vec<Tag>>;
}

/// SQLite-backed taxonomy repository.
pub struct SqliteTaxonomyRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTaxonomyRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl TaxonomyRepository for SqliteTaxonomyRepository<'_> {
    fn create_category(&self, category_name: &str) -> RepoResult<CategoryId> {
        let name = required_name(category_name, "category_name")?;
        self.conn.execute(
            "INSERT INTO categories (category_name) VALUES (?1);",
            [name],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn delete_category(&self, id: CategoryId) -> RepoResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM categories WHERE id = ?1;", [id])?;
        Ok(changed > 0)
    }

    fn create_tag(&self, tag_name: &str) -> RepoResult<TagId> {
        let name = required_name(tag_name, "tag_name")?;
        self.conn
            .execute("INSERT INTO tags (tag_name) VALUES (?1);", [name])?;
        Ok(self.conn.last_insert_rowid())
    }

    fn delete_tag(&self, id: TagId) -> RepoResult<bool> {
        let changed = self.conn.execute("DELETE FROM tags WHERE id = ?1;", [id])?;
        Ok(changed > 0)
    }

    fn list_tags(&self) -> RepoResult<Vec<Tag>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, tag_name FROM tags ORDER BY id ASC;")?;
        let mut rows = stmt.query([])?;
        let mut tags = Vec::new();
        while let Some(row) = rows.next()? {
            tags.push(Tag {
                id: row.get("id")?,
                tag_name: row.get("tag_name")?,
            });
        }
        Ok(tags)
    }
}

fn required_name<'a>(value: &'a str, field: &str) -> RepoResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RepoError::InvalidData(format!("{field} must not be blank")));
    }
    Ok(trimmed)
}
