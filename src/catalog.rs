pub const CLASSROOMS: &[&str] = &[
    "6ºAno A", "6ºAno B", "6ºAno C", "6ºAno D", "6ºAno E", "6ºAno F",
    "7ºAno A", "7ºAno B", "7ºAno C", "7ºAno D", "7ºAno E", "7ºAno F",
    "8ºAno A", "8ºAno B", "8ºAno C", "8ºAno D", "8ºAno E",
    "9ºAno A", "9ºAno B", "9ºAno C", "9ºAno D",
    "1ª Série A", "1ª Série B", "1ª Série C", "1ª Série D", "1ª Série E", "1ª Série F",
    "2ª Série A", "2ª Série B", "2ª Série C", "2ª Série D", "2ª Série E", "2ª Série F",
    "2ª Série G", "2ª Série H",
    "3ª Série A", "3ª Série B", "3ª Série C", "3ª Série D", "3ª Série E", "3ª Série F",
    "3ª Série G",
];

pub const IRREGULARITIES: &[&str] = &[
    "ATRASO",
    "SEM MATERIAL",
    "USO DE CELULAR",
    "CONVERSA",
    "DESRESPEITO",
    "INDISCIPLINA",
    "DESACATO",
    "SEM TAREFA",
    "SAIU SEM PERMISSÃO",
];

pub fn is_classroom(value: &str) -> bool {
    CLASSROOMS.contains(&value)
}

pub fn is_irregularity(value: &str) -> bool {
    IRREGULARITIES.contains(&value)
}
