//! Prompt templates for indexing and query time.

use crate::schema::{EntityRecord, NamedEntity};

fn enumerate_lines(items: &[String], start: usize) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + start, item))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_entity_extraction_prompt(entity_types: &[String], text: &str) -> String {
    format!(
        r#"Identify every entity of the given types in the text below.

For each entity output:
- name: the entity name exactly as written in the text
- type: one of {types}
- description: a comprehensive description of the entity based on the text

Output ONLY a JSON array, no markdown, no explanations:
[{{"name": "<name>", "type": "<type>", "description": "<description>"}}]

TEXT:
{text}

JSON OUTPUT:"#,
        types = entity_types.join(", "),
        text = text
    )
}

pub fn build_description_prompt(entities: &[NamedEntity], text: &str) -> String {
    let listed = entities
        .iter()
        .map(|e| format!("- {} ({})", e.text, e.label))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"For each entity listed below, write a description of it based on the text.

Output ONLY a JSON array, using the names and types from the list:
[{{"name": "<name>", "type": "<type>", "description": "<description>"}}]

ENTITIES:
{listed}

TEXT:
{text}

JSON OUTPUT:"#
    )
}

pub fn build_relation_extraction_prompt(entities: &[EntityRecord], text: &str) -> String {
    let listed = entities
        .iter()
        .map(|e| match &e.entity_type {
            Some(t) => format!("- {} ({})", e.name, t),
            None => format!("- {}", e.name),
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Identify every pair of related entities in the text below.
Both the source and the target MUST come from the entity list.

Output ONLY a JSON array:
[{{"source": "<source entity>", "target": "<target entity>", "description": "<how they are related>"}}]

ENTITIES:
{listed}

TEXT:
{text}

JSON OUTPUT:"#
    )
}

pub fn build_continue_prompt(target: &str) -> String {
    format!(
        "Many {target} were missed in the last extraction. Add the missing {target} using the same JSON format.\nJSON OUTPUT:"
    )
}

pub fn build_loop_prompt(target: &str) -> String {
    format!("Are there still {target} that need to be added? Answer YES or NO only.")
}

pub fn build_entity_summary_prompt(entity: &str, descriptions: &[String]) -> String {
    format!(
        r#"Summarize the descriptions of the entity below into one concise description of its core features.
Output only the description.

ENTITY: {entity}

DESCRIPTIONS:
{descriptions}

SUMMARY:"#,
        descriptions = enumerate_lines(descriptions, 1)
    )
}

pub fn build_relation_summary_prompt(source: &str, target: &str, descriptions: &[String]) -> String {
    format!(
        r#"Summarize the descriptions of the relation between the two entities below into one concise sentence.
Output only the sentence.

SOURCE: {source}
TARGET: {target}

DESCRIPTIONS:
{descriptions}

SUMMARY:"#,
        descriptions = enumerate_lines(descriptions, 1)
    )
}

pub fn build_sentence_evaluation_prompt(sentences: &[String]) -> String {
    format!(
        r#"Score every sentence below by how much concrete information it carries.
Scores are integers from 0 to 10; more detailed sentences score higher.
Every sentence must get exactly one score.

Output ONLY a JSON array of scores in sentence order:
[<score of sentence 0>, <score of sentence 1>, ...]

SENTENCES:
{sentences}

JSON OUTPUT:"#,
        sentences = enumerate_lines(sentences, 0)
    )
}

pub fn build_entity_alignment_prompt(entities: &[(String, String)]) -> String {
    let listed = entities
        .iter()
        .map(|(name, description)| format!("- {}: {}", name, description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Below is a list of entities with descriptions. Group the entities that refer to the same real-world entity.
Judge by the key terms in the descriptions.

Output ONLY a JSON array of groups of entity names:
[["<name>", "<name>"], ["<name>", "<name>", "<name>"]]

ENTITIES:
{listed}

JSON OUTPUT:"#
    )
}

pub fn build_pronoun_replacement_prompt(text: &str) -> String {
    format!(
        r#"Rewrite the text below, replacing every pronoun with the noun it refers to.
Change nothing else and output only the rewritten text.

TEXT:
{text}

REWRITTEN TEXT:"#
    )
}

pub fn build_query_entity_prompt(question: &str) -> String {
    format!(
        r#"List the entities mentioned in the question below.

Output ONLY a JSON array of entity names:
["<name>", ...]

QUESTION: {question}

JSON OUTPUT:"#
    )
}

pub fn build_kg_judge_prompt(knowledge_graph: &str, question: &str) -> String {
    format!(
        r#"Does the knowledge graph below contain all the information needed to fully answer the question?
Answer YES or NO only.

KNOWLEDGE GRAPH:
{knowledge_graph}

QUESTION: {question}

ANSWER:"#
    )
}

pub fn build_additional_info_prompt(question: &str, knowledge_graph: &str) -> String {
    format!(
        r#"Which specific information about which entities of the knowledge graph is still required to answer the question?

Output ONLY a JSON object mapping entity names from the knowledge graph to the information needed:
{{"<entity name>": ["<information>", ...]}}

KNOWLEDGE GRAPH:
{knowledge_graph}

QUESTION: {question}

JSON OUTPUT:"#
    )
}

pub fn build_attribute_prompt(entity: &str, attribute: &str, context: &str) -> String {
    format!(
        r#"Extract the requested information about the entity from the context. Output only the information.

ENTITY: {entity}
INFORMATION: {attribute}

CONTEXT:
{context}

INFORMATION:"#
    )
}

pub fn build_answer_prompt(knowledge_graph: &str, question: &str) -> String {
    format!(
        r#"Answer the question using the knowledge graph below. If it cannot be answered, output "I CAN NOT ANSWER."

KNOWLEDGE GRAPH:
{knowledge_graph}

QUESTION: {question}

ANSWER:"#
    )
}
